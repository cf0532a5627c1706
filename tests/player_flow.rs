mod common;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;

use common::{guild, track, wait_until, Harness};
use nerox_player::{
    audio::{
        node::{NodeEvent, NodeId, PlaybackEvent, PlayerPatch, TrackEndReason},
        player::{DestroyReason, EnqueueOutcome, PlayerStatus, PendingTransition},
        queue::LoopMode,
        track::Track,
    },
    error::PlayerError,
};

fn start(name: &str) -> PlaybackEvent {
    PlaybackEvent::TrackStart {
        encoded: format!("enc-{name}"),
    }
}

fn end(name: &str, reason: TrackEndReason) -> PlaybackEvent {
    PlaybackEvent::TrackEnd {
        encoded: format!("enc-{name}"),
        reason,
    }
}

fn titles(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.title.clone()).collect()
}

/// Player con A sonando y B en cola
async fn playing_a_then_b(h: &Harness, id: u64) {
    h.create(guild(id));
    h.manager.play(guild(id), track("A")).await.unwrap();
    h.manager.play(guild(id), track("B")).await.unwrap();
    h.manager.handle_event(guild(id), start("A")).await;
}

#[tokio::test]
async fn test_play_then_queue_reports_outcomes() {
    let h = Harness::new();
    h.create(guild(1));

    let first = h.manager.play(guild(1), track("A")).await.unwrap();
    let second = h.manager.play(guild(1), track("B")).await.unwrap();

    assert_eq!(first, EnqueueOutcome::Started(track("A")));
    assert_eq!(second, EnqueueOutcome::Queued { position: 1 });
    assert_eq!(h.node.patches_for(guild(1)), vec![PlayerPatch::play(&track("A"), 100)]);

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.status, PlayerStatus::Pending);
    assert_eq!(titles(&snapshot.upcoming), vec!["Song B"]);
}

#[tokio::test]
async fn test_queue_runs_to_completion_and_destroys() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    playing_a_then_b(&h, 1).await;

    assert_eq!(h.manager.snapshot(guild(1)).unwrap().status, PlayerStatus::Active);
    assert_eq!(h.surface.sent.lock().len(), 1);

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("B")));
    assert_eq!(titles(&snapshot.previous), vec!["Song A"]);
    assert_eq!(h.node.count(guild(1), &PlayerPatch::play(&track("B"), 100)), 1);

    h.manager.handle_event(guild(1), start("B")).await;
    h.manager.handle_event(guild(1), end("B", TrackEndReason::Finished)).await;

    assert!(h.manager.snapshot(guild(1)).is_none());
    let report = reports.try_recv().unwrap();
    assert_eq!(report.reason, DestroyReason::QueueEnded);
    assert_eq!(report.last_track, Some(track("B")));
    assert_eq!(h.node.destroyed.lock().clone(), vec![guild(1)]);
    assert_eq!(h.pool.bound_node(guild(1)), None);
}

#[tokio::test]
async fn test_now_playing_follows_tracks() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    let first = h.surface.sent.lock()[0].0;
    assert_eq!(h.surface.sent.lock()[0].1.title, "Song A");

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;
    assert_eq!(h.surface.deleted.lock().clone(), vec![first]);

    h.manager.handle_event(guild(1), start("B")).await;
    let sent = h.surface.sent.lock().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].1.title, "Song B");

    let live = h.manager.snapshot(guild(1)).unwrap().now_playing.unwrap();
    assert_eq!(live.message_id, sent[1].0);

    h.manager.destroy(guild(1), DestroyReason::Requested).await;
    assert_eq!(h.surface.deleted.lock().clone(), vec![first, sent[1].0]);
}

#[tokio::test]
async fn test_pause_updates_message_in_place() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    assert!(h.manager.pause(guild(1), true).await.unwrap());

    let edited = h.surface.edited.lock().clone();
    assert_eq!(edited.len(), 1);
    assert!(edited[0].1.paused);
    assert_eq!(h.surface.sent.lock().len(), 1);
    assert_eq!(h.manager.snapshot(guild(1)).unwrap().status, PlayerStatus::Paused);
}

#[tokio::test]
async fn test_destroy_twice_reports_once() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    playing_a_then_b(&h, 1).await;

    let first = h.manager.destroy(guild(1), DestroyReason::Requested).await;
    let second = h.manager.destroy(guild(1), DestroyReason::Requested).await;

    assert_eq!(first.unwrap().reason, DestroyReason::Requested);
    assert!(second.is_none());
    assert!(reports.try_recv().is_ok());
    assert!(matches!(reports.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(
        h.manager.skip(guild(1)).await,
        Err(PlayerError::NoPlayer)
    ));
}

#[tokio::test]
async fn test_pause_twice_contacts_node_once() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    assert!(h.manager.pause(guild(1), true).await.unwrap());
    assert!(!h.manager.pause(guild(1), true).await.unwrap());

    assert_eq!(h.node.count(guild(1), &PlayerPatch::pause(true)), 1);
    assert!(h.manager.snapshot(guild(1)).unwrap().paused);
}

#[tokio::test]
async fn test_next_track_starts_unpaused_after_skip_while_paused() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    assert!(h.manager.pause(guild(1), true).await.unwrap());
    assert!(h.manager.skip(guild(1)).await.unwrap());
    h.manager.handle_event(guild(1), end("A", TrackEndReason::Stopped)).await;
    h.manager.handle_event(guild(1), start("B")).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("B")));
    assert!(!snapshot.paused);
    assert_eq!(snapshot.status, PlayerStatus::Active);
    assert!(!h.surface.sent.lock().last().unwrap().1.paused);

    // El nodo volvió a sonar, así que la pausa debe llegarle de nuevo
    assert!(h.manager.pause(guild(1), true).await.unwrap());
    assert_eq!(h.node.count(guild(1), &PlayerPatch::pause(true)), 2);
}

#[tokio::test]
async fn test_previous_without_history_is_noop() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    assert_eq!(h.manager.previous(guild(1)).await.unwrap(), None);

    assert_eq!(h.node.count(guild(1), &PlayerPatch::stop()), 0);
    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("A")));
    assert_eq!(snapshot.pending, None);
}

#[tokio::test]
async fn test_previous_replays_last_track() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;
    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;
    h.manager.handle_event(guild(1), start("B")).await;

    let rewound = h.manager.previous(guild(1)).await.unwrap();
    assert_eq!(rewound, Some(track("A")));
    assert_eq!(
        h.manager.snapshot(guild(1)).unwrap().pending,
        Some(PendingTransition::Rewind)
    );

    // El nodo confirma que detuvo B
    h.manager.handle_event(guild(1), end("B", TrackEndReason::Stopped)).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("A")));
    assert_eq!(titles(&snapshot.upcoming), vec!["Song B"]);
    assert!(snapshot.previous.is_empty());
    assert_eq!(h.node.count(guild(1), &PlayerPatch::play(&track("A"), 100)), 2);
}

#[tokio::test]
async fn test_double_skip_advances_once() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;
    h.manager.play(guild(1), track("C")).await.unwrap();

    assert!(h.manager.skip(guild(1)).await.unwrap());
    assert!(!h.manager.skip(guild(1)).await.unwrap());
    assert_eq!(h.node.count(guild(1), &PlayerPatch::stop()), 1);

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Stopped)).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("B")));
    assert_eq!(titles(&snapshot.upcoming), vec!["Song C"]);
    assert_eq!(snapshot.pending, None);
}

#[tokio::test]
async fn test_skip_overrides_loop_track() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;
    h.manager.set_loop_mode(guild(1), LoopMode::Track).await.unwrap();

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;
    assert_eq!(h.manager.snapshot(guild(1)).unwrap().current, Some(track("A")));
    assert_eq!(h.node.count(guild(1), &PlayerPatch::play(&track("A"), 100)), 2);

    h.manager.handle_event(guild(1), start("A")).await;
    h.manager.skip(guild(1)).await.unwrap();
    h.manager.handle_event(guild(1), end("A", TrackEndReason::Stopped)).await;

    assert_eq!(h.manager.snapshot(guild(1)).unwrap().current, Some(track("B")));
}

#[tokio::test]
async fn test_node_stuck_only_affects_its_guild() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    playing_a_then_b(&h, 1).await;
    playing_a_then_b(&h, 2).await;

    h.manager
        .handle_event(
            guild(1),
            PlaybackEvent::TrackStuck {
                encoded: "enc-A".into(),
                threshold_ms: 10_000,
            },
        )
        .await;

    assert!(h.manager.snapshot(guild(1)).is_none());
    let report = reports.try_recv().unwrap();
    assert_eq!(report.guild_id, guild(1));
    assert_eq!(report.reason, DestroyReason::NodeStuck(10_000));

    let other = h.manager.snapshot(guild(2)).unwrap();
    assert_eq!(other.status, PlayerStatus::Active);
    assert_eq!(other.current, Some(track("A")));
    assert_eq!(h.manager.active_players(), 1);
}

#[tokio::test]
async fn test_stale_and_replaced_track_end_are_ignored() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;
    let before = h.node.patches_for(guild(1)).len();

    h.manager.handle_event(guild(1), end("Z", TrackEndReason::Finished)).await;
    h.manager.handle_event(guild(1), end("A", TrackEndReason::Replaced)).await;
    h.manager.handle_event(guild(1), start("Z")).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("A")));
    assert_eq!(titles(&snapshot.upcoming), vec!["Song B"]);
    assert_eq!(h.node.patches_for(guild(1)).len(), before);
    assert_eq!(h.surface.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_node_cleanup_and_voice_close_destroy() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    playing_a_then_b(&h, 1).await;
    playing_a_then_b(&h, 2).await;

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Cleanup)).await;
    assert_eq!(reports.try_recv().unwrap().reason, DestroyReason::NodeCleanup);

    // Un cierre que no es desconexión forzada no destruye el player
    let closed = |code| PlaybackEvent::VoiceClosed {
        code,
        reason: "closed".into(),
        by_remote: true,
    };
    h.manager.handle_event(guild(2), closed(4006)).await;
    assert!(h.manager.snapshot(guild(2)).is_some());

    h.manager.handle_event(guild(2), closed(4014)).await;
    assert!(h.manager.snapshot(guild(2)).is_none());
    assert_eq!(reports.try_recv().unwrap().reason, DestroyReason::VoiceDisconnected);
}

#[tokio::test]
async fn test_autoplay_picks_unplayed_candidate() {
    let h = Harness::new();
    h.create(guild(1));
    h.manager.set_autoplay(guild(1), true).await.unwrap();
    h.manager.play(guild(1), track("A")).await.unwrap();
    h.manager.handle_event(guild(1), start("A")).await;

    *h.search.results.lock() = vec![track("A"), track("C")];
    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("C")));
    assert_eq!(snapshot.current.unwrap().requester, None);
    assert_eq!(h.node.count(guild(1), &PlayerPatch::play(&track("C"), 100)), 1);
    assert!(h.search.queries.lock()[0].contains("list=RDid-A"));
}

#[tokio::test]
async fn test_autoplay_without_candidates_destroys() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    h.create(guild(1));
    h.manager.set_autoplay(guild(1), true).await.unwrap();
    h.manager.play(guild(1), track("A")).await.unwrap();
    h.manager.handle_event(guild(1), start("A")).await;

    h.manager.handle_event(guild(1), end("A", TrackEndReason::Finished)).await;

    assert!(h.manager.snapshot(guild(1)).is_none());
    assert_eq!(reports.try_recv().unwrap().reason, DestroyReason::AutoplayFailed);
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let h = Harness::new();
    playing_a_then_b(&h, 1).await;

    assert_eq!(h.manager.set_volume(guild(1), 250).await.unwrap(), 200);
    assert_eq!(h.node.count(guild(1), &PlayerPatch::volume(200)), 1);
    assert_eq!(h.manager.snapshot(guild(1)).unwrap().volume, 200);
}

#[tokio::test]
async fn test_create_requires_ready_node() {
    let h = Harness::new();
    h.pool.apply(&NodeEvent::Disconnected {
        node: NodeId::new("main"),
        reason: "1006".into(),
    });

    let result = h.manager.create(guild(1), common::VOICE, common::TEXT);
    assert!(matches!(result, Err(PlayerError::NoNodesAvailable)));
}

#[tokio::test]
async fn test_create_returns_existing_player() {
    let h = Harness::new();
    let first = h.manager.create(guild(1), common::VOICE, common::TEXT).unwrap();
    let second = h.manager.create(guild(1), common::VOICE, common::TEXT).unwrap();
    assert_eq!(first.generation(), second.generation());

    h.manager.destroy(guild(1), DestroyReason::Requested).await;
    let third = h.manager.create(guild(1), common::VOICE, common::TEXT).unwrap();
    assert!(third.generation() > first.generation());
}

#[tokio::test]
async fn test_concurrent_autoplay_toggles_both_apply() {
    let h = Harness::new();
    h.create(guild(1));

    let (first, second) = tokio::join!(
        h.manager.toggle_autoplay(guild(1)),
        h.manager.toggle_autoplay(guild(1))
    );

    let mut results = vec![first.unwrap(), second.unwrap()];
    results.sort();
    assert_eq!(results, vec![false, true]);
    assert!(!h.manager.snapshot(guild(1)).unwrap().autoplay);
}

#[tokio::test]
async fn test_destroy_while_now_playing_is_being_sent() {
    let h = Harness::new();
    h.create(guild(1));
    h.manager.play(guild(1), track("A")).await.unwrap();

    h.surface.gate.close();
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.handle_event(guild(1), start("A")).await });
    wait_until(|| h.surface.gate.waiting() == 1).await;

    let report = h.manager.destroy(guild(1), DestroyReason::Requested).await;
    assert_eq!(report.unwrap().last_track, Some(track("A")));
    h.surface.gate.open();
    pending.await.unwrap();

    // El mensaje publicado tras el destroy no queda huérfano
    let sent = h.surface.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(h.surface.deleted.lock().clone(), vec![sent[0].0]);
    assert!(h.manager.snapshot(guild(1)).is_none());
}

#[tokio::test]
async fn test_destroy_while_play_request_is_in_flight() {
    let h = Harness::new();
    let mut reports = h.manager.subscribe_destroyed();
    h.create(guild(1));

    h.node.gate.close();
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.play(guild(1), track("A")).await });
    wait_until(|| h.node.gate.waiting() == 1).await;

    h.manager.destroy(guild(1), DestroyReason::Requested).await.unwrap();
    h.node.gate.open();
    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, EnqueueOutcome::Started(track("A")));

    // Un TrackStart tardío no revive nada
    h.manager.handle_event(guild(1), start("A")).await;
    assert!(h.manager.snapshot(guild(1)).is_none());
    assert!(h.surface.sent.lock().is_empty());
    assert_eq!(h.node.destroyed.lock().clone(), vec![guild(1)]);
    assert_eq!(reports.try_recv().unwrap().reason, DestroyReason::Requested);
    assert!(matches!(reports.try_recv(), Err(TryRecvError::Empty)));
}

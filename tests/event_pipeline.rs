mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;

use common::{guild, track, wait_until, Harness};
use nerox_player::audio::{
    node::{GuildEvent, NodeEvent, NodeId, PlaybackEvent, TrackEndReason},
    player::{DestroyReason, EnqueueOutcome, PendingTransition},
};

fn from_node(node: &str, id: u64, event: PlaybackEvent) -> NodeEvent {
    NodeEvent::Guild(GuildEvent {
        node: NodeId::new(node),
        guild_id: guild(id),
        event,
    })
}

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

#[tokio::test]
async fn test_node_events_reach_the_player_in_order() {
    let h = Harness::running().await;
    h.create(guild(1));
    h.manager.play(guild(1), track("A")).await.unwrap();
    h.manager.play(guild(1), track("B")).await.unwrap();

    // Un nodo al que el guild no está asignado no puede mover su cola
    h.node.emit(from_node("other", 1, end("A", TrackEndReason::Finished)));
    h.node.emit(from_node("main", 1, start("A")));
    wait_until(|| h.surface.sent.lock().len() == 1).await;
    assert_eq!(h.manager.snapshot(guild(1)).unwrap().current, Some(track("A")));

    // TrackStart(B) sólo es vigente si TrackEnd(A) se procesó antes
    h.node.emit(from_node("main", 1, end("A", TrackEndReason::Finished)));
    h.node.emit(from_node("main", 1, start("B")));
    wait_until(|| h.surface.sent.lock().len() == 2).await;

    let snapshot = h.manager.snapshot(guild(1)).unwrap();
    assert_eq!(snapshot.current, Some(track("B")));
    assert_eq!(h.surface.sent.lock()[1].1.title, "Song B");
}

#[tokio::test]
async fn test_destroy_closes_the_mailbox() {
    let h = Harness::running().await;
    h.create(guild(1));
    let player = h.manager.get_player(guild(1)).unwrap();
    h.manager.play(guild(1), track("A")).await.unwrap();
    h.node.emit(from_node("main", 1, start("A")));
    wait_until(|| h.surface.sent.lock().len() == 1).await;

    h.manager.destroy(guild(1), DestroyReason::Requested).await.unwrap();

    // La tarea del buzón suelta su referencia al terminar
    wait_until(|| Arc::strong_count(&player) == 1).await;
    assert!(!player.is_alive());

    // Eventos tardíos del guild destruido no publican nada
    h.node.emit(from_node("main", 1, start("A")));
    h.create(guild(2));
    h.manager.play(guild(2), track("C")).await.unwrap();
    h.node.emit(from_node("main", 2, start("C")));
    wait_until(|| h.surface.sent.lock().len() == 2).await;
    assert_eq!(h.surface.sent.lock()[1].1.title, "Song C");
}

#[tokio::test]
async fn test_session_loss_releases_stuck_skip() {
    let h = Harness::running().await;
    let mut reports = h.manager.subscribe_destroyed();
    h.create(guild(1));
    h.manager.play(guild(1), track("A")).await.unwrap();
    h.manager.play(guild(1), track("B")).await.unwrap();
    assert!(h.manager.skip(guild(1)).await.unwrap());
    assert_eq!(
        h.manager.snapshot(guild(1)).unwrap().pending,
        Some(PendingTransition::Skip)
    );

    // El nodo se cae antes de confirmar el TrackEnd
    h.node.emit(NodeEvent::Disconnected {
        node: h.node.id(),
        reason: "1006".into(),
    });
    wait_until(|| h.manager.snapshot(guild(1)).is_none()).await;

    let report = reports.recv().await.unwrap();
    assert!(matches!(
        report.reason,
        DestroyReason::NodeException(ref message) if message.contains("sesión perdida")
    ));
    assert_eq!(h.pool.bound_node(guild(1)), None);

    h.node.emit(NodeEvent::Ready {
        node: h.node.id(),
        session_id: "session-2".into(),
        resumed: false,
    });
    wait_until(|| h.pool.ready_count() == 1).await;
    h.create(guild(1));
    assert_eq!(
        h.manager.play(guild(1), track("C")).await.unwrap(),
        EnqueueOutcome::Started(track("C"))
    );
}

#[tokio::test]
async fn test_fresh_session_drops_players_of_the_old_one() {
    let h = Harness::running().await;
    h.create(guild(1));
    h.manager.play(guild(1), track("A")).await.unwrap();

    h.node.emit(NodeEvent::Ready {
        node: h.node.id(),
        session_id: "session-2".into(),
        resumed: false,
    });
    wait_until(|| h.manager.snapshot(guild(1)).is_none()).await;
    assert_eq!(h.node.destroyed.lock().clone(), vec![guild(1)]);
}

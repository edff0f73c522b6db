mod common;

use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use common::{daemon, session_config, symbol, update};
use papertrade_core::recorder::replay;
use papertrade_core::{
    CommissionConfig, DaemonState, DashboardServer, HaltReason, OrderIntent, Side,
    SubmitRejection,
};

/// Feed `prices` one at a time, `gap` apart, then end the feed.
fn paced_feed(prices: Vec<f64>, gap: Duration) -> mpsc::UnboundedReceiver<papertrade_core::MarketUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        for price in prices {
            if tx.send(update(price)).is_err() {
                return;
            }
            tokio::time::sleep(gap).await;
        }
    });
    rx
}

#[tokio::test(start_paused = true)]
async fn daily_loss_limit_halts_and_refuses_submissions() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = session_config(tmp.path());
    config.commission = CommissionConfig::zero();
    config.risk_limits.max_daily_loss = 1_000.0;

    let mut daemon = daemon(
        config,
        vec![
            Some(OrderIntent::market(symbol(), Side::Buy, 1_001.0)),
            None,
            Some(OrderIntent::market(symbol(), Side::Buy, 1.0)),
        ],
    );
    let subscriber = daemon.bus().subscribe();

    // 1001 * (99 - 100) = -1001
    let feed = paced_feed(vec![100.0, 99.0, 99.0], Duration::from_millis(500));
    daemon.run(feed, std::future::pending::<()>()).await.unwrap();

    let risk = daemon.risk_state().unwrap();
    assert!(risk.halted);
    assert_eq!(risk.halt_reason, Some(HaltReason::DailyLossLimit));
    assert_eq!(risk.daily_pnl, -1_001.0);

    let rejection = daemon
        .submit_intent(OrderIntent::market(symbol(), Side::Buy, 1.0))
        .err()
        .unwrap();
    assert_eq!(rejection, SubmitRejection::Halted(HaltReason::DailyLossLimit));
    assert_eq!(rejection.reason(), "daily_loss_limit");

    // The intent raised after the halt never reached the broker
    assert_eq!(daemon.positions()[0].net_quantity, 1_001.0);
    assert_eq!(daemon.broker().unwrap().get_statistics().total_orders, 1);

    let frames: Vec<Value> = std::iter::from_fn(|| subscriber.try_recv())
        .map(|event| serde_json::to_value(&event).unwrap())
        .collect();
    let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == "trade_executed").count(), 1);
    let halt = frames.iter().find(|f| f["type"] == "risk_halt").unwrap();
    assert_eq!(halt["data"]["reason"], "daily_loss_limit");
    assert_eq!(halt["data"]["daily_pnl"], -1_001.0);
}

#[tokio::test(start_paused = true)]
async fn replay_rebuilds_the_live_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let config = session_config(tmp.path());

    let mut daemon = daemon(
        config,
        vec![
            Some(OrderIntent::market(symbol(), Side::Buy, 10.0)),
            Some(OrderIntent::market(symbol(), Side::Sell, 4.0)),
            Some(OrderIntent::market(symbol(), Side::Buy, 6.0)),
            Some(OrderIntent::market(symbol(), Side::Sell, 15.0)),
            None,
        ],
    );
    let feed = paced_feed(vec![100.0, 105.0, 103.0, 98.0, 97.5], Duration::from_millis(500));
    let record = daemon.run(feed, std::future::pending::<()>()).await.unwrap();
    assert_eq!(daemon.state(), DaemonState::Stopped);

    let first = replay::rebuild(&record.session_dir).unwrap();
    let second = replay::rebuild(&record.session_dir).unwrap();
    assert_eq!(first.account(), second.account());
    assert_eq!(first.positions(), second.positions());

    // Marks are replayed alongside fills, so equity, peak, drawdown and daily
    // P&L match the live ledger exactly, not just cash
    let live_account = daemon.account().unwrap();
    assert_eq!(first.account(), &live_account);
    assert_eq!(first.positions(), daemon.positions());
    assert!(live_account.max_drawdown_seen > 0.0);
    assert_eq!(daemon.positions()[0].net_quantity, -3.0);
}

async fn next_frame<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn reconnecting_dashboard_gets_connected_then_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = session_config(tmp.path());
    config.broadcast.bind_address = "127.0.0.1:0".parse().unwrap();
    let broadcast = config.broadcast.clone();

    let mut daemon = daemon(config, vec![]);
    daemon.start().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let server = DashboardServer::new(daemon.bus(), broadcast);
    let (addr, serving) = server
        .bind_with_shutdown(async move {
            let _ = stopped.await;
        })
        .unwrap();
    let server_task = tokio::spawn(serving);
    let url = format!("ws://{}/ws", addr);

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let frame = next_frame(&mut first).await;
    assert_eq!(frame["type"], "connection");
    assert_eq!(frame["data"]["status"], "connected");
    let frame = next_frame(&mut first).await;
    assert_eq!(frame["type"], "snapshot");
    assert_eq!(frame["data"]["daemon_state"], "running");

    daemon.handle_market_update(update(101.0)).await.unwrap();
    let frame = next_frame(&mut first).await;
    assert_eq!(frame["type"], "bar_update");
    drop(first);

    // Live event published while the client is away
    daemon.handle_market_update(update(102.0)).await.unwrap();

    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["type"], "connection");
    assert_eq!(frame["data"]["status"], "connected");
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["type"], "snapshot");
    assert_eq!(frame["data"]["account"]["initial_capital"], 1_000_000.0);
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["type"], "bar_update");
    assert_eq!(frame["data"]["close"], 102.0);

    // Shutdown publishes a final snapshot, then disconnects everyone
    daemon.stop().await.unwrap();
    let mut frame = next_frame(&mut second).await;
    while frame["type"] != "connection" {
        frame = next_frame(&mut second).await;
    }
    assert_eq!(frame["data"]["status"], "disconnected");

    let _ = stop.send(());
    server_task.await.unwrap();
}

//! Ingress / Egress Pump: 接続ごとに 1 本ずつ走る転送タスク
//!
//! transport の読み書きハーフを `Stream` / `Sink` として受け取る。
//! 接続ごとに Ingress が 1 本、Egress が 1 本だけ生成され、
//! 他の接続のタスクがこの transport に触れることはない。
//!
//! transport エラーはその接続にとって常に終端で、リトライせず Deregister する
//! （ピアは新しい Connection Record として再接続する）。

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::connection::ConnectionHandle;
use super::{DisconnectReason, Hub};

/// transport から inbound フレームを汲み上げ、ハブへ渡す。
///
/// 読み取りは厳密に逐次で、前のフレームのルーティング判断が済むまで
/// 次のフレームは処理しない。読み取りエラー・close フレーム・ストリーム
/// 終端で Deregister を開始して終了する。
pub async fn ingress_pump<R, E>(hub: Arc<Hub>, handle: Arc<ConnectionHandle>, mut frames: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut closed = handle.closed_signal();
    loop {
        if handle.is_closing() {
            break;
        }
        let next = tokio::select! {
            _ = closed.changed() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                handle.touch(hub.now_millis());
                hub.handle_inbound(&handle, text.as_str()).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // WS レベルの keep-alive 応答もアクティビティとして扱う
                handle.touch(hub.now_millis());
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(connection_id = %handle.id(), "ignoring binary frame");
            }
            Some(Ok(Message::Close(_))) => {
                tracing::info!(connection_id = %handle.id(), "client requested close");
                hub.disconnect(handle.id(), DisconnectReason::PeerClosed).await;
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(connection_id = %handle.id(), error = %e, "transport read error");
                hub.disconnect(handle.id(), DisconnectReason::TransportError).await;
                break;
            }
            None => {
                tracing::info!(connection_id = %handle.id(), "transport stream ended");
                hub.disconnect(handle.id(), DisconnectReason::PeerClosed).await;
                break;
            }
        }
    }
    handle.pump_finished();
}

/// 送信キューを排出して transport へ書き込む。
///
/// キュー待ちとキープアライブタイマの早い方で起き、書き込みエラーで
/// Deregister を開始して終了する。バースト時は既にキューに積まれている
/// フレームを 1 回の flush にまとめて書き込みオーバーヘッドを均す。
pub async fn egress_pump<W, E>(
    hub: Arc<Hub>,
    handle: Arc<ConnectionHandle>,
    mut queue: mpsc::Receiver<String>,
    mut sink: W,
) where
    W: Sink<Message, Error = E> + Unpin,
    E: fmt::Display,
{
    let mut closed = handle.closed_signal();
    let mut keepalive = tokio::time::interval(hub.config().keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval の最初の即時 tick は読み捨てる
    keepalive.tick().await;

    'run: loop {
        if handle.is_closing() {
            break;
        }
        tokio::select! {
            _ = closed.changed() => break,
            maybe = queue.recv() => match maybe {
                Some(frame) => {
                    if let Err(e) = sink.feed(Message::Text(frame.into())).await {
                        tracing::warn!(connection_id = %handle.id(), error = %e, "transport write error");
                        hub.disconnect(handle.id(), DisconnectReason::TransportError).await;
                        break 'run;
                    }
                    while let Ok(frame) = queue.try_recv() {
                        if let Err(e) = sink.feed(Message::Text(frame.into())).await {
                            tracing::warn!(connection_id = %handle.id(), error = %e, "transport write error");
                            hub.disconnect(handle.id(), DisconnectReason::TransportError).await;
                            break 'run;
                        }
                    }
                    if let Err(e) = sink.flush().await {
                        tracing::warn!(connection_id = %handle.id(), error = %e, "transport flush error");
                        hub.disconnect(handle.id(), DisconnectReason::TransportError).await;
                        break 'run;
                    }
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Ping(vec![1, 2, 3, 4].into())).await {
                    tracing::warn!(connection_id = %handle.id(), error = %e, "keep-alive probe failed");
                    hub.disconnect(handle.id(), DisconnectReason::TransportError).await;
                    break;
                }
            }
        }
    }

    // 切断後に残っていたフレームは破棄する
    queue.close();
    while queue.try_recv().is_ok() {}
    handle.pump_finished();
}

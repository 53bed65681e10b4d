use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_core::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::{debug, warn};

use crate::ui::web::state::AppState;

enum Frame {
    Event(SseEvent),
    Stop,
}

/// `GET /api/events`：任务变化以 SSE 推送，事件名即任务事件类型。
///
/// 服务开始停止时流随之结束，否则长连接会拖住优雅退出。
pub(crate) async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let events = BroadcastStream::new(state.jobs.subscribe()).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event.job) {
            Ok(data) => Some(Frame::Event(SseEvent::default().event(event.kind).data(data))),
            Err(e) => {
                warn!(target: "web", "任务事件序列化失败: {e}");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(target: "web", skipped, "SSE 客户端落后，丢弃事件");
            None
        }
    });

    let stop = WatchStream::new(state.shutdown_receiver())
        .filter(|stopping| *stopping)
        .map(|_| Frame::Stop);

    let sse_stream = events
        .merge(stop)
        .take_while(|frame| match frame {
            Frame::Event(_) => true,
            Frame::Stop => {
                debug!(target: "web", "服务停止，关闭 SSE 流");
                false
            }
        })
        .filter_map(|frame| match frame {
            Frame::Event(ev) => Some(Ok(ev)),
            Frame::Stop => None,
        });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

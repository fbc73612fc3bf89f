//! Relays a single channel request across a channel pair.

use tracing::trace;

use crate::{
    channel::{ChannelControl, IncomingRequest}, error::{ProxyError, ProxyResult}
};

/// Send `incoming` to `target` and, when the sender asked for one, return the verdict through `origin`.
///
/// Channel replies carry only success or failure, so nothing beyond the verdict is relayed.
pub async fn forward_request(incoming: IncomingRequest, origin: &dyn ChannelControl, target: &dyn ChannelControl) -> ProxyResult<()> {
    let IncomingRequest { request, want_reply } = incoming;
    let kind = request.kind();

    let accepted = target
        .send_request(request, want_reply)
        .await
        .map_err(|err| ProxyError::ForwardRequest {
            request: kind,
            reason: err.to_string(),
        })?;
    trace!(request = kind, want_reply, accepted, "forwarded channel request");

    if want_reply {
        origin.reply(accepted).await.map_err(|err| ProxyError::ReplyRequest {
            request: kind,
            reason: err.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::ChannelRequest, test_support::MockControl};

    fn incoming(request: ChannelRequest, want_reply: bool) -> IncomingRequest {
        IncomingRequest { request, want_reply }
    }

    #[tokio::test]
    async fn relays_verdict_when_reply_wanted() -> anyhow::Result<()> {
        let origin = MockControl::new();
        let target = MockControl::with_verdict(false);

        forward_request(
            incoming(
                ChannelRequest::Subsystem {
                    name: "sftp".into(),
                },
                true,
            ),
            &origin,
            &target,
        )
        .await?;

        let sent = target.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "subsystem");
        assert!(sent[0].1);
        assert_eq!(origin.replies(), vec![false]);
        Ok(())
    }

    #[tokio::test]
    async fn no_reply_traffic_without_want_reply() -> anyhow::Result<()> {
        let origin = MockControl::new();
        let target = MockControl::new();

        forward_request(
            incoming(
                ChannelRequest::WindowChange {
                    col_width: 100,
                    row_height: 30,
                    pix_width: 0,
                    pix_height: 0,
                },
                false,
            ),
            &origin,
            &target,
        )
        .await?;

        assert_eq!(target.sent(), vec![("window-change", false)]);
        assert!(origin.replies().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn send_failure_names_the_request() {
        let origin = MockControl::new();
        let target = MockControl::new();
        target.fail_requests();

        let err = forward_request(incoming(ChannelRequest::Shell, true), &origin, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::ForwardRequest { request: "shell", .. }));
        assert!(origin.replies().is_empty());
    }

    #[tokio::test]
    async fn reply_failure_is_reported() {
        let origin = MockControl::new();
        origin.fail_replies();
        let target = MockControl::new();

        let err = forward_request(
            incoming(
                ChannelRequest::Exec {
                    command: b"uptime".to_vec(),
                },
                true,
            ),
            &origin,
            &target,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::ReplyRequest { request: "exec", .. }));
    }
}

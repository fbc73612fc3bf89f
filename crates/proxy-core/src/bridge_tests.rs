use std::sync::Arc;

use tokio::task::JoinHandle;

use super::*;
use crate::{
    channel::ChannelRequest, test_support::{MockControl, MockPeer, WAIT, mock_end}
};

struct Harness {
    local: MockPeer,
    remote: MockPeer,
    errors: mpsc::Receiver<ProxyError>,
    bridge: JoinHandle<()>,
}

fn start() -> Harness {
    start_with(MockControl::new(), MockControl::new())
}

fn start_with(local_control: MockControl, remote_control: MockControl) -> Harness {
    let (reporter, errors) = ErrorReporter::channel(16);
    let (local_end, local) = mock_end(Arc::new(local_control));
    let (remote_end, remote) = mock_end(Arc::new(remote_control));
    let bridge = tokio::spawn(Bridge::new(local_end, remote_end, reporter).run());
    Harness {
        local,
        remote,
        errors,
        bridge,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let wait = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, wait).await.expect("condition never became true");
}

async fn finished(bridge: JoinHandle<()>) {
    tokio::time::timeout(WAIT, bridge)
        .await
        .expect("bridge did not finish")
        .expect("bridge task panicked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bytes_round_trip_in_both_directions() {
    let Harness {
        mut local,
        mut remote,
        bridge,
        ..
    } = start();

    local.send(b"hel");
    local.send(b"lo\n");
    local.eof();
    assert_eq!(remote.read_to_end().await, b"hello\n");

    remote.send_stderr(b"warning: motd\n");
    remote.send(&[0, 1, 2, 255]);
    remote.send(b"world");
    remote.eof();
    assert_eq!(local.read_to_end().await, [&[0u8, 1, 2, 255][..], &b"world"[..]].concat());
    assert_eq!(local.stderr_rx.recv().await.as_deref(), Some(&b"warning: motd\n"[..]));

    finished(bridge).await;
    assert_eq!(local.control.close_count(), 1);
    assert_eq!(remote.control.close_count(), 1);
}

#[tokio::test]
async fn pty_request_verdict_reaches_client() {
    let Harness { local, remote, .. } = start();

    local.request(
        ChannelRequest::Pty {
            term: "xterm".into(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        },
        true,
    );

    eventually(|| !local.control.replies().is_empty()).await;
    assert_eq!(remote.control.sent(), vec![("pty-req", true)]);
    assert!(matches!(
        remote.control.requests()[0],
        ChannelRequest::Pty {
            col_width: 80,
            row_height: 24,
            ..
        }
    ));
    assert_eq!(local.control.replies(), vec![true]);
}

#[tokio::test]
async fn rejected_request_is_reported_as_failure() {
    let Harness { local, remote, .. } = start_with(MockControl::new(), MockControl::with_verdict(false));

    local.request(
        ChannelRequest::Env {
            name: "LC_ALL".into(),
            value: "C".into(),
        },
        true,
    );

    eventually(|| !local.control.replies().is_empty()).await;
    assert_eq!(remote.control.sent(), vec![("env", true)]);
    assert_eq!(local.control.replies(), vec![false]);
}

#[tokio::test]
async fn request_without_reply_produces_no_reply() {
    let Harness { local, remote, .. } = start();

    local.request(
        ChannelRequest::WindowChange {
            col_width: 132,
            row_height: 43,
            pix_width: 0,
            pix_height: 0,
        },
        false,
    );
    local.request(ChannelRequest::Shell, true);

    eventually(|| remote.control.sent().len() == 2).await;
    eventually(|| !local.control.replies().is_empty()).await;
    assert_eq!(remote.control.sent(), vec![("window-change", false), ("shell", true)]);
    assert_eq!(local.control.replies(), vec![true]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_status_after_eof_reaches_client() {
    let Harness {
        mut local,
        mut remote,
        bridge,
        ..
    } = start();

    local.eof();
    assert!(remote.read_to_end().await.is_empty());

    remote.send(b"done\n");
    remote.eof();
    remote.request(ChannelRequest::ExitStatus { code: 7 }, false);

    assert_eq!(local.read_to_end().await, b"done\n");
    finished(bridge).await;

    assert_eq!(local.control.sent(), vec![("exit-status", false)]);
    assert!(matches!(local.control.requests()[0], ChannelRequest::ExitStatus { code: 7 }));
    assert!(remote.control.replies().is_empty());
    assert_eq!(local.control.close_count(), 1);
}

#[tokio::test]
async fn destination_vanishing_tears_down_the_pair() {
    let Harness {
        mut local,
        remote,
        bridge,
        ..
    } = start();

    local.send(b"ls\n");
    let remote_control = remote.disconnect();

    assert!(local.read_to_end().await.is_empty());
    finished(bridge).await;
    assert_eq!(local.control.close_count(), 1);
    assert_eq!(remote_control.close_count(), 1);
}

#[tokio::test]
async fn client_vanishing_tears_down_the_pair() {
    let Harness {
        local,
        mut remote,
        bridge,
        ..
    } = start();

    remote.send(b"banner\n");
    let local_control = local.disconnect();

    assert!(remote.read_to_end().await.is_empty());
    finished(bridge).await;
    assert_eq!(local_control.close_count(), 1);
    assert_eq!(remote.control.close_count(), 1);
}

#[tokio::test]
async fn forward_failure_closes_the_pair_once() {
    let remote_control = MockControl::new();
    remote_control.fail_requests();
    let Harness {
        local,
        remote,
        mut errors,
        bridge,
    } = start_with(MockControl::new(), remote_control);

    local.request(
        ChannelRequest::Exec {
            command: b"uname -a".to_vec(),
        },
        true,
    );

    local.control.wait_closed().await;
    remote.control.wait_closed().await;
    let err = errors.recv().await.unwrap();
    assert!(matches!(err, ProxyError::ForwardRequest { request: "exec", .. }));

    let local_control = local.disconnect();
    let remote_control = remote.disconnect();
    finished(bridge).await;
    assert_eq!(local_control.close_count(), 1);
    assert_eq!(remote_control.close_count(), 1);
    assert!(local_control.replies().is_empty());
}

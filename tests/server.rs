//! End-to-end tests for the tokio connection driver.

mod common;

use std::sync::Arc;

use bytes::BytesMut;
use common::{decode_envelope, empty_message};
use thriftwire::{
    filter::{DecoderFilter, DecoderFilterCallbacks, FilterChainFactoryCallbacks},
    server::drive_connection,
    AppException, AppExceptionType, DecoderEvent, FilterStatus, MessageType, ProxyConfig,
    ProxyStats,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Answers every request with a local exception reply once the request
/// frame completes.
struct LocalReplyFilter;

impl DecoderFilter for LocalReplyFilter {
    fn event(
        &mut self,
        event: &DecoderEvent,
        callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterStatus {
        if *event == DecoderEvent::TransportEnd {
            callbacks.send_local_reply(&AppException::new(
                AppExceptionType::UnknownMethod,
                "no upstream configured",
            ));
        }
        FilterStatus::Continue
    }
}

fn local_reply_config(stats: ProxyStats) -> Arc<ProxyConfig> {
    Arc::new(
        ProxyConfig::builder()
            .stats(stats)
            .filter_factory(Arc::new(|callbacks: &mut dyn FilterChainFactoryCallbacks| {
                callbacks.add_decoder_filter(Box::new(LocalReplyFilter));
            }))
            .build(),
    )
}

#[tokio::test]
async fn a_client_receives_its_reply_over_the_socket() {
    let stats = ProxyStats::new();
    let (mut client, server) = tokio::io::duplex(4096);
    let task = tokio::spawn(drive_connection(server, local_reply_config(stats.clone())));

    let request = empty_message("ping", MessageType::Call, 21);
    client.write_all(&request).await.expect("send request");

    let mut header = [0u8; 4];
    client.read_exact(&mut header).await.expect("frame header");
    let len = u32::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    client.read_exact(&mut payload).await.expect("frame payload");

    let mut frame = BytesMut::new();
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);
    let envelope = decode_envelope(&mut frame);
    assert_eq!(envelope.message_type(), Some(MessageType::Exception));
    assert_eq!(envelope.sequence_id(), Some(21));
    assert_eq!(envelope.method_name(), Some("ping"));

    client.shutdown().await.expect("half-close");
    task.await.expect("join").expect("drive");
    assert_eq!(stats.request.get(), 1);
}

#[tokio::test]
async fn malformed_bytes_close_the_connection() {
    let stats = ProxyStats::new();
    let (mut client, server) = tokio::io::duplex(4096);
    let task = tokio::spawn(drive_connection(server, local_reply_config(stats.clone())));

    client.write_all(&[0xff, 0xff, 0xff, 0xff]).await.expect("send garbage");

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.expect("read until close");
    assert!(rest.is_empty(), "no reply is possible without an envelope");

    task.await.expect("join").expect("drive");
    assert_eq!(stats.request_decoding_error.get(), 1);
}

#[tokio::test]
async fn consecutive_requests_are_answered_in_order() {
    let stats = ProxyStats::new();
    let (mut client, server) = tokio::io::duplex(4096);
    let task = tokio::spawn(drive_connection(server, local_reply_config(stats.clone())));

    for sequence_id in [1, 2, 3] {
        let request = empty_message("ping", MessageType::Call, sequence_id);
        client.write_all(&request).await.expect("send request");

        let mut header = [0u8; 4];
        client.read_exact(&mut header).await.expect("frame header");
        let len = u32::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        client.read_exact(&mut payload).await.expect("frame payload");

        let mut frame = BytesMut::new();
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&payload);
        assert_eq!(decode_envelope(&mut frame).sequence_id(), Some(sequence_id));
    }

    client.shutdown().await.expect("half-close");
    task.await.expect("join").expect("drive");
    assert_eq!(stats.request.get(), 3);
}

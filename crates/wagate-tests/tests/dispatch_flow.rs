use std::collections::HashSet;
use std::time::Duration;
use wagate::{GatewayError, MessageKind, OutgoingMessage};
use wagate_tests::harness::connection::{Plan, Stats};
use wagate_tests::harness::{TestGateway, paired_device};

const PNG: &[u8] = b"\x89PNG\r\n\x1A\n\0\0\0\rIHDR";
const PDF: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";

fn targets(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn malformed_recipients_fail_alone_and_the_rest_are_sent() {
    let t = TestGateway::logged_in(vec![paired_device("62811")]).await;

    let report = t
        .gateway
        .send_media(
            "62811",
            targets(&["+15551234567", "@g.us", "15550000001", "  ", "team@g.us"]),
            PNG.to_vec(),
            Some("photo.png".to_string()),
            "hello",
        )
        .await
        .unwrap();

    assert_eq!(Stats::get(&t.factory.stats.uploads), 3);
    assert_eq!(Stats::get(&t.factory.stats.sends), 3);
    assert_eq!(report.sent.len(), 3);
    assert_eq!(report.failed.len(), 2);
    assert!(report
        .failed
        .iter()
        .all(|f| matches!(f.error, GatewayError::InvalidRecipient { .. })));

    let recipients: HashSet<_> = report.sent.iter().map(|s| s.recipient.as_str()).collect();
    assert_eq!(
        recipients,
        HashSet::from([
            "15551234567@s.whatsapp.net",
            "15550000001@s.whatsapp.net",
            "team@g.us",
        ])
    );
    assert!(report.sent.iter().all(|s| s.kind == MessageKind::Image));
    assert!(report.sent.iter().all(|s| s.file_name.as_deref() == Some("photo.png")));

    // The legacy view: one error, no results, though three messages went out.
    let legacy = report.into_first_error();
    assert!(matches!(legacy, Err(GatewayError::InvalidRecipient { .. })));
}

#[tokio::test]
async fn all_valid_recipients_collapse_to_the_full_list() {
    let t = TestGateway::logged_in(vec![paired_device("62811")]).await;

    let sent = t
        .gateway
        .send_media("62811", targets(&["1", "2"]), PDF.to_vec(), None, "")
        .await
        .unwrap()
        .into_first_error()
        .unwrap();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.kind == MessageKind::Document));
}

#[tokio::test]
async fn upstream_failure_is_reported_per_recipient() {
    let t = TestGateway::new(vec![paired_device("62811")]);
    t.factory.plan(
        "62811",
        Plan {
            failing_recipients: HashSet::from(["2".to_string()]),
            ..Plan::default()
        },
    );
    t.gateway.auto_login().await.unwrap();

    let report = t
        .gateway
        .send_media(
            "62811",
            targets(&["1", "2", "3"]),
            PDF.to_vec(),
            Some("q3.pdf".into()),
            "report",
        )
        .await
        .unwrap();

    assert_eq!(report.sent.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].target, "2");
    assert!(matches!(report.failed[0].error, GatewayError::Upstream(_)));

    let documents = t.factory.last().sent_messages();
    assert_eq!(documents.len(), 2);
    for (_, message) in documents {
        match message {
            OutgoingMessage::Document {
                file_name,
                title,
                caption,
                mimetype,
                ..
            } => {
                assert_eq!(file_name, "q3.pdf");
                assert_eq!(title, "document.enc");
                assert_eq!(caption, "report");
                assert_eq!(mimetype, "application/pdf");
            }
            other => panic!("expected a document, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn fan_out_respects_the_concurrency_ceiling() {
    let t = TestGateway::with_concurrency(vec![paired_device("62811")], 3);
    t.factory.plan(
        "62811",
        Plan {
            send_delay: Some(Duration::from_millis(20)),
            ..Plan::default()
        },
    );
    t.gateway.auto_login().await.unwrap();

    let recipients: Vec<String> = (0..12).map(|n| format!("1555000{n:04}")).collect();
    let report = t
        .gateway
        .send_media("62811", recipients, PNG.to_vec(), None, "")
        .await
        .unwrap();

    assert_eq!(report.sent.len(), 12);
    let peak = Stats::get(&t.factory.stats.max_in_flight);
    assert!(peak <= 3, "peak concurrency {peak} exceeded the ceiling");
    assert!(peak >= 1);
}

#[tokio::test]
async fn cancelled_dispatcher_sends_nothing() {
    let t = TestGateway::logged_in(vec![paired_device("62811")]).await;
    t.gateway.dispatcher().shutdown();

    let report = t
        .gateway
        .send_media("62811", targets(&["1", "2"]), PNG.to_vec(), None, "")
        .await
        .unwrap();

    assert!(report.sent.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|f| f.error.code() == "cancelled"));
    assert_eq!(Stats::get(&t.factory.stats.uploads), 0);
}

#[tokio::test]
async fn media_to_an_unknown_sender_is_unauthenticated() {
    let t = TestGateway::new(vec![]);
    let err = t
        .gateway
        .send_media("62811", targets(&["1"]), PNG.to_vec(), None, "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnauthenticatedSession(ref key) if key == "62811"));
}

#[tokio::test]
async fn text_bulk_logs_failures_and_returns_once_all_attempts_finish() {
    let t = TestGateway::new(vec![paired_device("62811")]);
    t.factory.plan(
        "62811",
        Plan {
            failing_recipients: HashSet::from(["2".to_string()]),
            send_delay: Some(Duration::from_millis(5)),
            ..Plan::default()
        },
    );
    t.gateway.auto_login().await.unwrap();

    t.gateway
        .send_text_bulk("62811", targets(&["1", "2", "@g.us", "4"]), "hi all".to_string())
        .await
        .unwrap();

    // Three well-formed recipients were attempted before the call returned.
    assert_eq!(Stats::get(&t.factory.stats.sends), 3);
    assert_eq!(Stats::get(&t.factory.stats.in_flight), 0);
    assert_eq!(t.factory.last().sent_messages().len(), 2);
}

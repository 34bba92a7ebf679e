mod common;

use common::*;
use lcr_core::device::Value;
use lcr_core::driver::PRODUCT_ID;
use lcr_core::events::{DataEvent, DriverEvent};
use lcr_core::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

fn driver(replies: Vec<Vec<u8>>) -> (Driver, Sent, broadcast::Receiver<DriverEvent>) {
    init_tracing();
    let (transport, sent) = MockTransport::new(replies);
    let mut driver = Driver::new(ConnectionConfig::default(), Box::new(transport));
    let rx = driver.subscribe();
    driver.open().unwrap();
    (driver, sent, rx)
}

fn drain(rx: &mut broadcast::Receiver<DriverEvent>) -> Vec<DriverEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_attributes_are_cached() {
    let (mut driver, _sent, _rx) = driver(vec![
        field_reply(0x00, b"LCR 600\0"),
        volume_reply(0x01, 1250),
    ]);

    driver.get_product_id(true).await.unwrap();
    let value = driver.request_attribute("GrossQty_NE").await.unwrap();

    assert_eq!(value, Some(Value::Integer(1250)));
    assert_eq!(
        driver.attribute(PRODUCT_ID),
        Some(&Value::Text("LCR 600".to_string()))
    );
    assert_eq!(driver.attribute("GrossQty_NE"), Some(&Value::Integer(1250)));
    assert_eq!(driver.attributes().len(), 2);
}

#[tokio::test]
async fn test_list_fields_resolve_labels() {
    let (mut driver, _sent, _rx) = driver(vec![
        field_reply(0x01, &[0x01]),
        field_reply(0x01, &[0x00]),
        field_reply(0x01, &[0x09]),
    ]);

    assert_eq!(
        driver.request_attribute("QtyUnits_WM").await.unwrap(),
        Some(Value::Text("LITRE".to_string()))
    );
    // decimals table maps indices to numbers
    assert_eq!(
        driver.request_attribute("Decimals_WM").await.unwrap(),
        Some(Value::Integer(2))
    );
    // unlabeled index passes through
    assert_eq!(
        driver.request_attribute("QtyUnits_WM").await.unwrap(),
        Some(Value::Integer(9))
    );
}

#[tokio::test]
async fn test_failed_read_keeps_previous_attribute() {
    let (mut driver, _sent, mut rx) = driver(vec![volume_reply(0x01, 10), reply(&[0x02])]);

    driver.request_attribute("NetQty_NE").await.unwrap();
    drain(&mut rx);
    assert_eq!(driver.request_attribute("NetQty_NE").await.unwrap(), None);
    assert_eq!(driver.attribute("NetQty_NE"), Some(&Value::Integer(10)));

    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [DriverEvent::Failed(failed)] if failed.name.as_deref() == Some("NetQty_NE")
    ));
}

#[tokio::test]
async fn test_switch_movement_is_reported() {
    let (mut driver, _sent, mut rx) = driver(vec![
        volume_reply(0x01, 1),
        volume_reply(0x00, 1),
        volume_reply(0x12, 1),
    ]);
    drain(&mut rx);

    for _ in 0..3 {
        driver.get_data("GrossQty_NE", false).await.unwrap();
    }

    let switches: Vec<SwitchEvent> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            DriverEvent::Switch(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].from.description, Some("RUN"));
    assert_eq!(switches[0].to.description, Some("STOP"));
}

#[tokio::test]
async fn test_interrupt_finishes_delivery() {
    let (mut driver, sent, mut rx) = driver(vec![
        volume_reply(0x01, 100),
        volume_reply(0x01, 150),
        volume_reply(0x01, 150),
    ]);

    driver.request_attribute("GrossQty_NE").await.unwrap();
    assert!(!driver.interrupt_summary("GrossQty_NE").await.unwrap());
    assert_eq!(sent.lock().unwrap().len(), 1);

    driver.request_attribute("GrossQty_NE").await.unwrap();
    drain(&mut rx);
    assert!(driver.interrupt_summary("GrossQty_NE").await.unwrap());

    let events = drain(&mut rx);
    let DriverEvent::Summary(summary) = &events[0] else {
        panic!("expected the summary before the reading, got {:?}", events);
    };
    assert_eq!(summary.name, "GrossQty_NE");
    assert_eq!(summary.meter.start, 100.0);
    assert_eq!(summary.meter.finish, 150.0);
    assert_eq!(summary.meter.total, 50.0);
    assert!(summary.time.duration_ms >= 0);
    assert!(summary.status.is_some());
    assert!(matches!(events[1], DriverEvent::Data(DataEvent::Field(_))));
    assert!(!driver.connection().summarizer().is_changing("GrossQty_NE"));
}

#[tokio::test]
async fn test_reset_summary() {
    let (mut driver, sent, _rx) = driver(vec![
        volume_reply(0x01, 100),
        volume_reply(0x01, 120),
        volume_reply(0x01, 130),
    ]);

    assert!(!driver.reset_summary("GrossQty_NE").await.unwrap());
    assert!(sent.lock().unwrap().is_empty());

    driver.request_attribute("GrossQty_NE").await.unwrap();
    driver.request_attribute("GrossQty_NE").await.unwrap();
    assert!(driver.connection().summarizer().is_changing("GrossQty_NE"));

    assert!(driver.reset_summary("GrossQty_NE").await.unwrap());
    let state = driver
        .connection()
        .summarizer()
        .state("GrossQty_NE")
        .unwrap()
        .clone();
    assert_eq!(state.last_value, 130.0);
    assert!(!state.on_process);
}

#[tokio::test]
async fn test_waiting_time() {
    let (mut driver, _sent, _rx) = driver(vec![]);
    assert_eq!(driver.connection().summarizer().settle_ms(), 1000);
    driver.set_waiting_time(250);
    assert_eq!(driver.connection().summarizer().settle_ms(), 250);
}

#[tokio::test]
async fn test_misuse_sends_nothing() {
    let (mut driver, sent, _rx) = driver(vec![]);

    assert!(matches!(
        driver.get_data("NoSuchField", false).await,
        Err(ProtocolError::UnknownField(_))
    ));
    assert!(matches!(
        driver.set_field("NoSuchField", false).await,
        Err(ProtocolError::UnknownField(_))
    ));
    assert!(matches!(
        driver.set_baud_rate(115200, false).await,
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert!(matches!(
        driver.issue_command("launch", false).await,
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert!(matches!(
        driver.interrupt_summary("NoSuchField").await,
        Err(ProtocolError::UnknownField(_))
    ));

    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_set_device_address_redirects_requests() {
    let (mut driver, sent, _rx) = driver(vec![reply(&[0x00]), volume_reply(0x01, 1)]);

    let outcome = driver.set_device_address(0x05, false).await.unwrap();
    assert_eq!(outcome, Outcome::Acknowledged { message_id: 0x25 });
    driver.get_data("GrossQty_NE", false).await.unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0][2], NODE);
    assert_eq!(&sent[0][6..8], &[0x25, 0x05]);
    assert_eq!(sent[1][2], 0x05);
}

#[tokio::test]
async fn test_refused_address_change_keeps_node() {
    let (mut driver, sent, _rx) = driver(vec![reply(&[0x08]), volume_reply(0x01, 1)]);

    let outcome = driver.set_device_address(0x05, false).await.unwrap();
    assert!(matches!(outcome, Outcome::Failed(_)));
    driver.get_data("GrossQty_NE", false).await.unwrap();
    assert_eq!(sent.lock().unwrap()[1][2], NODE);
}

#[tokio::test]
async fn test_set_baud_rate_sends_index() {
    let (mut driver, sent, _rx) = driver(vec![reply(&[0x00])]);
    driver.set_baud_rate(9600, false).await.unwrap();
    assert_eq!(&sent.lock().unwrap()[0][6..8], &[0x7C, 0x02]);
}

#[tokio::test]
async fn test_issue_command_by_code() {
    let (mut driver, sent, _rx) = driver(vec![field_reply(0x11, &[])]);

    assert!(matches!(
        driver.issue_command("stop", false).await,
        Err(ProtocolError::InvalidArgument(_))
    ));
    driver.issue_command("0x02", false).await.unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][6..8], &[0x24, 0x02]);
}

#[tokio::test]
async fn test_issue_command_by_name() {
    let catalog = FieldCatalog::from_json_str(
        r#"{ "fields": { "GrossQty_NE": { "id": 2, "type": "VOLUME" } }, "commands": { "STOP": 1 } }"#,
    )
    .unwrap();
    let (transport, sent) = MockTransport::new(vec![field_reply(0x11, &[])]);
    let mut driver = Driver::with_catalog(ConnectionConfig::default(), Box::new(transport), catalog);
    let mut rx = driver.subscribe();
    driver.open().unwrap();
    drain(&mut rx);

    let outcome = driver.issue_command("stop", false).await.unwrap();
    let Outcome::CommandIssued(code) = outcome else {
        panic!("expected an issued command");
    };
    assert_eq!(code.code, 0x00);
    assert_eq!(&sent.lock().unwrap()[0][6..8], &[0x24, 0x01]);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, DriverEvent::Data(DataEvent::IssueCommand { .. }))));
}

#[tokio::test]
async fn test_events_serialize_as_json() {
    let (mut driver, _sent, mut rx) = driver(vec![volume_reply(0x01, 7)]);
    drain(&mut rx);
    driver.get_data("GrossQty_NE", false).await.unwrap();

    let event = rx.try_recv().unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "data");
    assert_eq!(json["data"]["kind"], "field");
    assert_eq!(json["data"]["name"], "GrossQty_NE");
    assert_eq!(json["data"]["value"], 7);
}

#[tokio::test]
async fn test_stuffed_volume_is_read_whole() {
    let (mut driver, _sent, _rx) = driver(vec![volume_reply(0x01, 126)]);
    assert_eq!(
        driver.request_attribute("GrossQty_NE").await.unwrap(),
        Some(Value::Integer(126))
    );
}

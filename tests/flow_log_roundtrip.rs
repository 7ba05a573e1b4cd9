//! Round-trip law for the positional mapper: rendering a typed record back
//! into its line format and re-mapping it must reproduce the record.

use proptest::prelude::*;

use aws_log_collector::mappers::{FlowLogMapper, FlowLogRow, RecordInput, Row};

/// Render a row in the default 14-field order, `-` for null.
fn render(row: &FlowLogRow) -> String {
    fn opt<T: ToString>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    [
        opt(&row.version),
        opt(&row.account_id),
        opt(&row.interface_id),
        opt(&row.src_addr),
        opt(&row.dst_addr),
        opt(&row.src_port),
        opt(&row.dst_port),
        opt(&row.protocol),
        opt(&row.packets),
        opt(&row.bytes),
        opt(&row.start),
        opt(&row.end),
        opt(&row.action),
        opt(&row.log_status),
    ]
    .join(" ")
}

/// Token that can never be confused with the `-` null marker or a separator.
fn token() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9._]{0,11}"
}

fn ip() -> impl Strategy<Value = String> {
    (0u8..=255, 0u8..=255, 0u8..=255, 0u8..=255)
        .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d))
}

prop_compose! {
    fn arb_endpoints()(
        version in proptest::option::of(0i32..=7),
        account_id in proptest::option::of(token()),
        interface_id in proptest::option::of(token()),
        src_addr in proptest::option::of(ip()),
        dst_addr in proptest::option::of(ip()),
        src_port in proptest::option::of(0i32..=65535),
        dst_port in proptest::option::of(0i32..=65535),
    ) -> FlowLogRow {
        FlowLogRow {
            version,
            account_id,
            interface_id,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            ..Default::default()
        }
    }
}

prop_compose! {
    fn arb_row()(
        mut row in arb_endpoints(),
        protocol in proptest::option::of(0i32..=255),
        packets in proptest::option::of(0i64..=1_000_000),
        bytes in proptest::option::of(0i64..=1_000_000_000),
        start in proptest::option::of(0i64..=2_000_000_000),
        end in proptest::option::of(0i64..=2_000_000_000),
        action in proptest::option::of(prop_oneof![Just("ACCEPT".to_string()), Just("REJECT".to_string())]),
        log_status in proptest::option::of(prop_oneof![
            Just("OK".to_string()),
            Just("NODATA".to_string()),
            Just("SKIPDATA".to_string()),
        ]),
    ) -> FlowLogRow {
        row.protocol = protocol;
        row.packets = packets;
        row.bytes = bytes;
        row.start = start;
        row.end = end;
        row.action = action;
        row.log_status = log_status;
        row
    }
}

proptest! {
    #[test]
    fn test_render_then_map_reproduces_row(row in arb_row()) {
        let mapper = FlowLogMapper::default_schema();
        let line = render(&row);
        let mapped = match mapper.map(&RecordInput::Line(line.clone())) {
            Ok(Row::Flow(mapped)) => mapped,
            other => panic!("line '{}' mapped to {:?}", line, other),
        };
        prop_assert_eq!(mapped, row);
    }
}

//! Built-in LCR 600 reference tables
//!
//! Values follow the LCR API field-number and status-bit tables.

use super::{FieldDescriptor, FieldType, ListEntry};

pub(super) const FIELDS: &[(&str, FieldDescriptor)] = &[
    ("ProductNumber_DL", FieldDescriptor::list(0, 0)),
    ("ProductCode_DL", FieldDescriptor::new(1, FieldType::Text)),
    ("GrossQty_NE", FieldDescriptor::new(2, FieldType::Volume)),
    ("NetQty_NE", FieldDescriptor::new(3, FieldType::Volume)),
    ("FlowRate_NE", FieldDescriptor::new(4, FieldType::Volume)),
    ("ProductDescriptor_DL", FieldDescriptor::new(11, FieldType::Text)),
    ("ShiftGross_NE", FieldDescriptor::new(13, FieldType::Volume)),
    ("ShiftNet_NE", FieldDescriptor::new(14, FieldType::Volume)),
    ("GrossTotal_WM", FieldDescriptor::new(17, FieldType::Volume)),
    ("NetTotal_WM", FieldDescriptor::new(18, FieldType::Volume)),
    ("UnitID_UL", FieldDescriptor::new(24, FieldType::Text)),
    ("NoFlowTimer_DL", FieldDescriptor::new(25, FieldType::Integer)),
    ("Temp_WM", FieldDescriptor::new(33, FieldType::SFloat)),
    ("TempOffset_WM", FieldDescriptor::new(34, FieldType::SFloat)),
    ("TempScale_WM", FieldDescriptor::list(35, 10)),
    ("MeterID_WM", FieldDescriptor::new(36, FieldType::Text)),
    ("QtyUnits_WM", FieldDescriptor::list(38, 4)),
    ("Decimals_WM", FieldDescriptor::list(39, 14)),
    ("FlowDirection_WM", FieldDescriptor::list(40, 21)),
    ("TimeUnit_WM", FieldDescriptor::list(41, 11)),
    ("CalibrationEvent_NE", FieldDescriptor::new(42, FieldType::Long)),
    ("ConfigurationEvent_NE", FieldDescriptor::new(43, FieldType::Long)),
    ("GrossCount_NE", FieldDescriptor::new(44, FieldType::Volume)),
    ("NetCount_NE", FieldDescriptor::new(45, FieldType::Volume)),
    ("Printer_WM", FieldDescriptor::list(56, 19)),
    ("SupplyVoltage_NE", FieldDescriptor::new(68, FieldType::UFloat)),
    ("SerialID_FL", FieldDescriptor::new(80, FieldType::Text)),
    ("AvgFlowRate", FieldDescriptor::new(126, FieldType::Volume)),
    ("CompFlowRate", FieldDescriptor::new(127, FieldType::Volume)),
];

pub(super) fn lists() -> Vec<(u8, Vec<(i64, ListEntry)>)> {
    let text = |s: &str| ListEntry::Text(s.to_string());
    vec![
        (
            4,
            vec![
                (0, text("GALLON")),
                (1, text("LITRE")),
                (2, text("CUBIC METER")),
                (3, text("POUND")),
                (4, text("KILOGRAM")),
                (5, text("BARREL")),
                (6, text("")),
            ],
        ),
        (10, vec![(0, text("°C")), (1, text("°F"))]),
        (
            11,
            vec![
                (0, text("PER SECOND")),
                (1, text("PER MINUTE")),
                (2, text("PER HOUR")),
            ],
        ),
        (
            14,
            vec![
                (0, ListEntry::Number(2)),
                (1, ListEntry::Number(1)),
                (2, ListEntry::Number(0)),
            ],
        ),
        (
            19,
            vec![
                (0, text("Epson NewFontB")),
                (1, text("Epson NewFontA")),
                (2, text("Epson OldFontA")),
                (3, text("Epson OldFontB")),
                (4, text("Okidata Microline 184 Turbo")),
                (5, text("Blaster")),
            ],
        ),
        (21, vec![(0, text("RIGHT")), (1, text("LEFT"))]),
    ]
}

/// Switch position, low nibble of the device status byte
pub const SWITCH_POSITIONS: &[(u8, Option<&str>)] = &[
    (0x00, Some("BETWEEN")),
    (0x01, Some("RUN")),
    (0x02, Some("STOP")),
    (0x03, Some("PRINT")),
    (0x04, Some("SHIFT_PRINT")),
    (0x05, Some("CALIBRATE")),
    (0x06, None),
    (0x07, Some("UNAVAILABLE")),
    (0x08, Some("PRINTING")),
];

/// Machine state, high nibble of the device status byte
pub const MACHINE_STATES: &[(u8, Option<&str>)] = &[
    (0x00, Some("RUN")),
    (0x10, Some("STOP")),
    (0x20, Some("END_DELIVERY")),
    (0x30, Some("AUXILIARY")),
    (0x40, Some("SHIFT")),
    (0x50, Some("CALIBRATE")),
    (0x60, Some("WAIT_NOFLOW")),
    (0x70, None),
    (0x80, Some("ERROR")),
];

/// Printer status byte of the machine status block
pub const PRINTER_STATUS: &[(u8, &str)] = &[
    (0x00, "SUCCESS"),
    (0x01, "DELIVERY_TICKET"),
    (0x02, "SHIFT_TICKET"),
    (0x04, "DIAGNOSTIC_TICKET"),
    (0x08, "USER_PRINT"),
    (0x10, "OUT_OF_PAPER"),
    (0x20, "OFFLINE"),
    (0x40, "ERROR_WARNING"),
    (0x80, "BUSY"),
];

/// Delivery status bits
pub const DELIVERY_STATUS: &[(u16, &str)] = &[
    (0x0000, "SUCCESS"),
    (0x0001, "ERROR_CHECKSUM"),
    (0x0002, "ERROR_TEMPERATURE"),
    (0x0004, "ERROR_WATCHDOG_TIMEOUT"),
    (0x0008, "ERROR_VCF_SETUP"),
    (0x0010, "ERROR_VCF_DOMAIN"),
    (0x0020, "ERROR_METER_CALIBRATION"),
    (0x0040, "ERROR_PULSER_FAILURE"),
    (0x0080, "PRESET_STOP"),
    (0x0100, "NOFLOW_STOP"),
    (0x0200, "STOP_REQUEST"),
    (0x0400, "END_DELIVERY_REQUEST"),
    (0x0800, "ERROR_POWER_FAILURE"),
    (0x1000, "ERROR_PRESET"),
    (0x2000, "ERROR_LAPPAD_DISCONNECTED"),
    (0x4000, "ERROR_PRINTER_BUSY_OR_OFFLINE"),
    (0x8000, "ERROR_DATA_ACCESS"),
];

/// Delivery code bits
pub const DELIVERY_CODE: &[(u16, &str)] = &[
    (0x0000, "SUCCESS"),
    (0x0001, "PENDING_DELIVERY_TICKET"),
    (0x0002, "PENDING_SHIFT_TICKET"),
    (0x0004, "FLOW_ACTIVE"),
    (0x0008, "DELIVERY_ACTIVE"),
    (0x0010, "GROSS_PRESET_ACTIVE"),
    (0x0020, "NET_PRESET_ACTIVE"),
    (0x0040, "GROSS_PRESET_STOP"),
    (0x0080, "NET_PRESET_STOP"),
    (0x0100, "TVC_ACTIVE"),
    (0x0200, "SOLENOID1_CLOSED"),
    (0x0400, "DELIVERY_STARTED"),
    (0x0800, "NEW_DELIVERY_QUEUED"),
    (0x1000, "WARNING_DATA_ACCESS"),
    (0x2000, "CONFIG_EVENT"),
    (0x4000, "CALIB_EVENT"),
    (0x8000, "TRANSACTION_RECORD_SAVED"),
];

/// Return codes with a known meaning. Any other non-zero code is a failure
/// reported without a description.
pub const RETURN_CODES: &[(u8, &str)] = &[(0x00, "SUCCESS"), (0x26, "REQUEST_QUEUED")];

/// Look up a description in a `(code, description)` table
pub fn describe<K: PartialEq + Copy>(table: &[(K, &'static str)], code: K) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == code).map(|(_, d)| *d)
}

/// Look up a description in a table that allows reserved (`None`) entries
pub fn describe_reserved(table: &[(u8, Option<&'static str>)], code: u8) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == code).and_then(|(_, d)| *d)
}

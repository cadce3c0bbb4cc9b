//! CoT (Cursor on Target) events for the GPGGA relay
//!
//! Converts validated [`cotrelay_nmea::PositionReport`]s into CoT 2.0 events
//! and serializes them to the XML shape TAK servers accept.
//!
//! # Example
//!
//! ```rust
//! use cotrelay_cot::{serialize_event, CotConverter, CotSettings};
//! use cotrelay_nmea::parse_str;
//!
//! let report = parse_str(
//!     "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001*60",
//! )
//! .unwrap();
//!
//! let converter = CotConverter::new(CotSettings::new("a-f-G-U-C", 300));
//! let event = converter.convert(&report);
//! assert_eq!(event.stale_after_secs(), 300);
//!
//! let xml = serialize_event(&event);
//! assert!(xml.contains(r#"type="a-f-G-U-C""#));
//! ```

pub mod convert;
pub mod event;
pub mod parser;
pub mod serializer;

pub use convert::{device_uid, how_for, CotConverter, CotSettings};
pub use event::{Detail, Event, Point, UNKNOWN_ERROR};
pub use parser::{parse_cot, parse_cot_bytes, ParseError};
pub use serializer::{format_timestamp, serialize_event};

//! GPGGA sentence parsing for the CoT relay
//!
//! Field devices report position as NMEA 0183 GGA sentences with a device
//! identifier appended as the last field before the checksum. This crate
//! validates the framing and checksum, then parses the fields into a
//! [`PositionReport`]. Parsing is pure: the same input always gives the same
//! result.
//!
//! # Example
//!
//! ```rust
//! use cotrelay_nmea::parse_str;
//!
//! let report = parse_str(
//!     "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001*60",
//! )
//! .expect("valid sentence");
//! assert_eq!(report.device_id, "TEST001");
//! assert_eq!(report.satellites, 8);
//! ```

pub mod checksum;
pub mod error;
pub mod gga;

pub use checksum::{calculate_checksum, with_checksum};
pub use error::{SentenceError, SentenceErrorKind};
pub use gga::{parse_sentence, parse_str, FixQuality, PositionReport};

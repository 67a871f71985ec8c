//! Supervision falsification tests.
//!
//! # Certeza Methodology - Popperian Falsification
//!
//! Each test tries to DISPROVE a lifecycle property against real `/bin/sh`
//! children. Surviving the attempt is the evidence the property holds.
//!
//! | Category | ID Range | Description |
//! |----------|----------|-------------|
//! | A | F001-F010 | Start/stop lifecycle |
//! | B | F011-F020 | Crashes and auto-restart |
//! | C | F021-F030 | Events, channel and broadcast |
//! | D | F031-F040 | Log capture and rotation |
//! | E | F041-F050 | Stop escalation edge cases |

#![cfg(unix)]

pub mod events;
pub mod logging;

pub use harness::TestHarness;

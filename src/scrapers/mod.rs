//! Page template extractors.
//!
//! Each submodule knows the markup of one portal theme and exposes pure
//! functions from a parsed document to domain records. They never touch the
//! network; the orchestrator hands them response bodies.
//!
//! # Supported Templates
//!
//! | Template | Module | Pages |
//! |----------|--------|-------|
//! | Moodle (Boost-era theme) | [`moodle`] | login form, dashboard, course view, assignment view |

pub mod moodle;

//! Structured logging setup
//!
//! Wraps `tracing-subscriber` with a field formatter that censors any field
//! whose name is key-adjacent (see [`crate::audit::sanitize`]) before the
//! record is written. This is a defence-in-depth belt: the wallet capability
//! itself never yields secret bytes, so the censor should never fire on real
//! key material.

use std::fmt;
use std::fmt::Write as _;

use tracing::field::{Field, Visit};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::audit::sanitize::is_key_adjacent;

const CENSORED: &str = "[censored]";

/// Initialize the global subscriber. `level` is an `EnvFilter` directive,
/// e.g. `"info"` or `"agent_wallet_runtime=debug"`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().fmt_fields(RedactingFields))
        .with(filter)
        .init();
}

/// Field formatter that writes `name=[censored]` for key-adjacent names.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactingFields;

impl<'writer> FormatFields<'writer> for RedactingFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> fmt::Result {
        let mut visitor = RedactingVisitor {
            writer,
            result: Ok(()),
            first: true,
        };
        fields.record(&mut visitor);
        visitor.result
    }
}

struct RedactingVisitor<'w> {
    writer: Writer<'w>,
    result: fmt::Result,
    first: bool,
}

impl RedactingVisitor<'_> {
    fn pad(&mut self) -> &'static str {
        if self.first {
            self.first = false;
            ""
        } else {
            " "
        }
    }
}

impl Visit for RedactingVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if self.result.is_err() {
            return;
        }
        let pad = self.pad();
        self.result = if is_key_adjacent(field.name()) {
            write!(self.writer, "{pad}{}={CENSORED}", field.name())
        } else if field.name() == "message" {
            write!(self.writer, "{pad}{value}")
        } else {
            write!(self.writer, "{pad}{}={value}", field.name())
        };
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }
        let pad = self.pad();
        self.result = if is_key_adjacent(field.name()) {
            write!(self.writer, "{pad}{}={CENSORED}", field.name())
        } else if field.name() == "message" {
            write!(self.writer, "{pad}{value:?}")
        } else {
            write!(self.writer, "{pad}{}={value:?}", field.name())
        };
    }
}

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, id = $id:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!(target: "waymark", $level, $span, id = %$id);
        let _enter = span.enter();

        $crate::tracing::event!(target: "waymark", $level, $($msg),*)
    }};

    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!(target: "waymark", $level, $span);
        let _enter = span.enter();

        $crate::tracing::event!(target: "waymark", $level, $($msg),*)
    }};
}

/// Log a line written to a client. `id = ...` tags the connection.
#[macro_export]
macro_rules! outgoing {
    (id = $id:expr, level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::outgoing!(id = $id, level = TRACE, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Log a line read from a client. `id = ...` tags the connection.
#[macro_export]
macro_rules! incoming {
    (id = $id:expr, level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::incoming!(id = $id, level = TRACE, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (id = $id:expr, level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::internal!(id = $id, level = TRACE, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("waymark")
                })),
        )
        .try_init();
}

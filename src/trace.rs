// Structured trace events for observing a search run

use std::{fmt, sync::Arc};

pub type TraceCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    CacheHit { label: &'static str, route: String, price: f64 },
    CacheMiss { label: &'static str, route: String },
    CacheDrop { label: &'static str, route: String, reason: String },
    InflightWait { label: &'static str, route: String },
    FetchRetry { label: &'static str, route: String, attempt: u32 },
    FetchTimeout { label: &'static str, route: String },
    FetchError { label: &'static str, route: String, error: String },
    FetchOk { label: &'static str, route: String, total: usize, valid: usize },
    FetchPick { label: &'static str, route: String, price: f64, raw: String },
    FetchDrop { label: &'static str, route: String, reason: String },
    DestinationsEmpty { label: &'static str, origin: String },
    DestinationsListed { label: &'static str, origin: String, count: usize, limit: usize },
    DestinationsResult { label: &'static str, origin: String, kept: usize, concurrency: usize },
    /// Stage boundary summaries and other free-form run markers.
    Stage { name: &'static str, detail: String },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::CacheHit { label, route, price } => {
                write!(f, "CACHE_HIT {label} {route} price={price}")
            }
            TraceEvent::CacheMiss { label, route } => write!(f, "CACHE_MISS {label} {route}"),
            TraceEvent::CacheDrop { label, route, reason } => {
                write!(f, "CACHE_DROP {label} {route} {reason}")
            }
            TraceEvent::InflightWait { label, route } => write!(f, "INFLIGHT_WAIT {label} {route}"),
            TraceEvent::FetchRetry { label, route, attempt } => {
                write!(f, "FETCH_RETRY {label} {route} attempt={attempt}")
            }
            TraceEvent::FetchTimeout { label, route } => write!(f, "FETCH_TIMEOUT {label} {route}"),
            TraceEvent::FetchError { label, route, error } => {
                write!(f, "FETCH_ERROR {label} {route} err={error}")
            }
            TraceEvent::FetchOk { label, route, total, valid } => {
                write!(f, "FETCH_OK {label} {route} total={total} valid={valid}")
            }
            TraceEvent::FetchPick { label, route, price, raw } => {
                write!(f, "FETCH_PICK {label} {route} cheapest={price} raw={raw}")
            }
            TraceEvent::FetchDrop { label, route, reason } => {
                write!(f, "FETCH_DROP {label} {route} {reason}")
            }
            TraceEvent::DestinationsEmpty { label, origin } => {
                write!(f, "DEST_EMPTY {label} origin={origin}")
            }
            TraceEvent::DestinationsListed { label, origin, count, limit } => {
                write!(f, "DEST_LIST {label} origin={origin} count={count} limit={limit}")
            }
            TraceEvent::DestinationsResult { label, origin, kept, concurrency } => {
                write!(f, "DEST_RESULT {label} origin={origin} kept={kept} concurrency={concurrency}")
            }
            TraceEvent::Stage { name, detail } => write!(f, "{name} {detail}"),
        }
    }
}

/// Optional observer of trace events. Events are always logged through
/// `tracing`; the callback only sees them when one is installed.
#[derive(Clone, Default)]
pub struct TraceSink {
    callback: Option<TraceCallback>,
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl TraceSink {
    pub fn new(callback: TraceCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: TraceEvent) {
        let line = event.to_string();
        tracing::debug!(target: "sky_odyssey::trace", "{}", line);
        if let Some(callback) = &self.callback {
            callback(&line);
        }
    }

    pub fn stage(&self, name: &'static str, detail: impl Into<String>) {
        self.emit(TraceEvent::Stage {
            name,
            detail: detail.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_sink_receives_formatted_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = TraceSink::new(Arc::new(move |line: &str| {
            captured.lock().push(line.to_string())
        }));

        sink.emit(TraceEvent::CacheHit {
            label: "STEP1",
            route: "LYS->BCN".into(),
            price: 100.0,
        });
        sink.stage("STEP1_DONE", "candidates=3 budget_pruned=1");

        let lines = lines.lock();
        assert_eq!(lines[0], "CACHE_HIT STEP1 LYS->BCN price=100");
        assert_eq!(lines[1], "STEP1_DONE candidates=3 budget_pruned=1");
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        TraceSink::disabled().stage("RUN_START", "origins=[LYS]");
    }
}

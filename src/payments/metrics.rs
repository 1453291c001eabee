// Metric hooks for the payment path. Emitted as trace events on the
// "metrics" target until an exporter is wired in.

#[macro_export]
macro_rules! payments_counter_inc {
    ($name:expr $(, $key:expr => $val:expr )* $(,)?) => {
        {
            let labels: Vec<String> = vec![$( format!("{}={}", $key, $val) ),*];
            tracing::trace!(target: "metrics", counter = $name, labels = ?labels, "inc");
        }
    };
}

#[macro_export]
macro_rules! payments_histogram_observe_ms {
    ($name:expr, $ms:expr $(, $key:expr => $val:expr )* $(,)?) => {
        {
            let labels: Vec<String> = vec![$( format!("{}={}", $key, $val) ),*];
            tracing::trace!(target: "metrics", histogram = $name, value_ms = $ms, labels = ?labels, "observe");
        }
    };
}

mod stopwatch;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tera::Value;
use tracing::debug;

use crate::config::{CaptureKind, ProfilerSetting};
use crate::namespace::TEMPLATE_SUFFIX;

pub use stopwatch::{ManualStopwatch, Stopwatch, SystemStopwatch};

/// Load or render time, in microseconds, at which a template is flagged as slow.
pub const WARNING_TIME: u64 = 3_500;
/// Load or render time, in microseconds, at which a template is flagged as very slow.
pub const DANGER_TIME: u64 = 7_500;

pub type RecordId = u64;

/// Microsecond timestamps for one template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub load_started_at: u64,
    pub load_finished_at: u64,
    /// Read and parse, not render.
    pub load_time: u64,
    pub render_started_at: u64,
    pub render_finished_at: u64,
    /// Includes nested templates rendered by this one.
    pub render_time: u64,
    pub total_time: u64,
}

/// Bookkeeping for one template load (and render, if it was the one rendered).
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub id: RecordId,
    pub location: String,
    pub params: Value,
    pub source: Option<String>,
    pub context: Option<Value>,
    pub profiler_id: Option<String>,
    pub error: Option<String>,
    pub timings: Timings,
}

/// A record as handed to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedTemplate {
    pub location: String,
    pub bundle: Option<String>,
    pub path: String,
    pub source: Option<String>,
    pub params: Option<String>,
    pub context: Option<String>,
    pub error: Option<String>,
    #[serde(flatten)]
    pub timings: Timings,
    pub warning: bool,
    pub danger: bool,
}

/// Everything collected for one request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedData {
    /// In load order; the first one is the template that was rendered.
    pub templates: Vec<CollectedTemplate>,
    pub total_load_time: u64,
    pub total_render_time: u64,
    pub errors_found: usize,
}

/// The profiler-facing side of a collector.
pub trait DataCollector: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn name(&self) -> &str;
    fn has_dashboard(&self) -> bool;
    /// Data gathered for the request with this profiler id, or `None` when disabled.
    fn collect_data(&self, profiler_id: &str) -> serde_json::Result<Option<Value>>;
}

/// Records template load and render timings per request.
pub struct TwigDataCollector {
    setting: ProfilerSetting,
    stopwatch: Arc<dyn Stopwatch>,
    records: Mutex<Vec<TemplateRecord>>,
    next_id: AtomicU64,
}

impl TwigDataCollector {
    pub fn new(setting: ProfilerSetting) -> Self {
        Self::with_stopwatch(setting, Arc::new(SystemStopwatch))
    }

    pub fn with_stopwatch(setting: ProfilerSetting, stopwatch: Arc<dyn Stopwatch>) -> Self {
        Self {
            setting,
            stopwatch,
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_capture(&self, kind: CaptureKind) -> bool {
        self.setting.is_capture(kind)
    }

    fn records(&self) -> MutexGuard<'_, Vec<TemplateRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: RecordId, f: impl FnOnce(&mut TemplateRecord, u64)) {
        let now = self.stopwatch.microtime();
        if let Some(record) = self.records().iter_mut().find(|r| r.id == id) {
            f(record, now);
        }
    }

    /// Start a record for a template that is about to be loaded.
    pub fn add_template(&self, location: &str) -> Option<RecordId> {
        if !self.setting.is_enabled() {
            return None;
        }
        self.sweep_expired();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = TemplateRecord {
            id,
            location: location.to_string(),
            params: Value::Null,
            source: None,
            context: None,
            profiler_id: None,
            error: None,
            timings: Timings {
                load_started_at: self.stopwatch.microtime(),
                ..Timings::default()
            },
        };
        self.records().push(record);
        Some(id)
    }

    pub fn load_finished(&self, id: RecordId, params: Value, source: Option<&str>) {
        let source = source.filter(|_| self.is_capture(CaptureKind::Source));
        self.update(id, |record, now| {
            finish_load(&mut record.timings, now);
            record.params = params;
            record.source = source.map(str::to_string);
        });
    }

    pub fn load_failed(&self, id: RecordId, error: &str) {
        self.update(id, |record, now| {
            finish_load(&mut record.timings, now);
            record.error = Some(error.to_string());
        });
    }

    /// Tie a record to the request that caused it to be loaded.
    pub fn attach(&self, id: RecordId, profiler_id: Option<&str>) {
        let Some(profiler_id) = profiler_id else {
            return;
        };
        self.update(id, |record, _| {
            record.profiler_id = Some(profiler_id.to_string());
        });
    }

    pub fn render_start(&self, id: RecordId, profiler_id: Option<&str>, context: &Value) {
        let keep_context = self.is_capture(CaptureKind::Context);
        self.update(id, |record, now| {
            record.profiler_id = profiler_id.map(str::to_string);
            if keep_context {
                record.context = Some(context.clone());
            }
            record.timings.render_started_at = now;
        });
    }

    pub fn render_finished(&self, id: RecordId, error: Option<&str>) {
        self.update(id, |record, now| {
            let timings = &mut record.timings;
            timings.render_finished_at = now;
            timings.render_time = now.saturating_sub(timings.render_started_at);
            timings.total_time = timings.load_time + timings.render_time;
            if let Some(error) = error {
                record.error = Some(error.to_string());
            }
        });
    }

    /// Forget a record, e.g. for an optional include that was never there.
    pub fn discard(&self, id: RecordId) {
        self.records().retain(|r| r.id != id);
    }

    /// Records not yet collected.
    pub fn pending(&self) -> usize {
        self.records().len()
    }

    /// Drop records older than the configured TTL. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.setting.ttl_secs();
        if ttl == 0 {
            return 0;
        }
        let cutoff = self
            .stopwatch
            .microtime()
            .saturating_sub(ttl.saturating_mul(1_000_000));

        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.timings.load_started_at >= cutoff);
        let swept = before - records.len();
        if swept > 0 {
            debug!(swept, "dropped expired template records");
        }
        swept
    }

    /// Take every record belonging to `profiler_id`, leaving the rest in place.
    pub fn collect(&self, profiler_id: &str) -> Option<CollectedData> {
        if !self.setting.is_enabled() {
            return None;
        }

        let collected: Vec<TemplateRecord> = {
            let mut records = self.records();
            let (collected, retained) = std::mem::take(&mut *records)
                .into_iter()
                .partition(|r| r.profiler_id.as_deref() == Some(profiler_id));
            *records = retained;
            collected
        };

        let capture_params = self.is_capture(CaptureKind::Parameters);
        let mut data = CollectedData::default();

        for record in collected {
            let (bundle, path) = display_location(&record.location);
            let timings = record.timings;
            let danger = timings.load_time >= DANGER_TIME || timings.render_time >= DANGER_TIME;
            let warning =
                !danger && (timings.load_time >= WARNING_TIME || timings.render_time >= WARNING_TIME);

            if data.total_render_time == 0 {
                data.total_render_time = timings.total_time;
            }
            data.total_load_time += timings.load_time;
            if record.error.is_some() {
                data.errors_found += 1;
            }

            data.templates.push(CollectedTemplate {
                location: record.location,
                bundle,
                path,
                source: record.source,
                params: (capture_params && !record.params.is_null())
                    .then(|| pretty_json(&record.params))
                    .flatten(),
                context: record.context.as_ref().and_then(pretty_json),
                error: record.error,
                timings,
                warning,
                danger,
            });
        }

        Some(data)
    }
}

impl DataCollector for TwigDataCollector {
    fn is_enabled(&self) -> bool {
        self.setting.is_enabled()
    }

    fn name(&self) -> &str {
        "TwigJS"
    }

    fn has_dashboard(&self) -> bool {
        true
    }

    fn collect_data(&self, profiler_id: &str) -> serde_json::Result<Option<Value>> {
        self.collect(profiler_id)
            .map(serde_json::to_value)
            .transpose()
    }
}

fn finish_load(timings: &mut Timings, now: u64) {
    timings.load_finished_at = now;
    timings.load_time = now.saturating_sub(timings.load_started_at);
    timings.total_time = timings.load_time;
}

fn pretty_json(value: &Value) -> Option<String> {
    serde_json::to_string_pretty(value).ok()
}

/// Bundle name and suffixed path of a location, for display.
fn display_location(location: &str) -> (Option<String>, String) {
    match location.split_once(':') {
        Some((bundle, path)) => {
            let bundle = bundle.rsplit('/').next().unwrap_or(bundle);
            let stem = path.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(path);
            (Some(bundle.to_string()), format!("{stem}{TEMPLATE_SUFFIX}"))
        }
        None => (None, location.to_string()),
    }
}

use serde_json::{Map, Value};

/// Parameters accepted by `execute`/`preflight`/`start`.
///
/// `None` fields are omitted from the wire request entirely rather than
/// sent as `null`.
#[derive(Debug, Clone, Default)]
pub struct ExecuteParams {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub resolution_ms: Option<i64>,
    pub max_delay_ms: Option<i64>,
    pub persistent: bool,
    pub immediate: bool,
    pub disable_all_metric_publishes: Option<bool>,
}

impl ExecuteParams {
    pub(crate) fn to_json_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(start) = self.start {
            map.insert("start".into(), Value::from(start));
        }
        if let Some(stop) = self.stop {
            map.insert("stop".into(), Value::from(stop));
        }
        if let Some(resolution) = self.resolution_ms {
            map.insert("resolution".into(), Value::from(resolution));
        }
        if let Some(max_delay) = self.max_delay_ms {
            map.insert("maxDelay".into(), Value::from(max_delay));
        }
        if self.persistent {
            map.insert("persistent".into(), Value::from(true));
        }
        if self.immediate {
            map.insert("immediate".into(), Value::from(true));
        }
        if let Some(disable) = self.disable_all_metric_publishes {
            map.insert("disableAllMetricPublishes".into(), Value::from(disable));
        }
        map
    }

    /// Return a copy with `start` overridden, used when resuming a
    /// computation from `last_logical_ts`.
    pub(crate) fn with_start(&self, since: i64) -> Self {
        let mut next = self.clone();
        next.start = Some(since);
        next
    }
}

/// Parameters accepted by `attach`.
#[derive(Debug, Clone, Default)]
pub struct AttachParams {
    pub filters: Option<Vec<String>>,
    pub resolution_ms: Option<i64>,
}

impl AttachParams {
    pub(crate) fn to_json_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(filters) = &self.filters {
            map.insert("filters".into(), Value::from(filters.clone()));
        }
        if let Some(resolution) = self.resolution_ms {
            map.insert("resolution".into(), Value::from(resolution));
        }
        map
    }
}

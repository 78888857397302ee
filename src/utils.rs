use std::collections::HashMap;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("invalid progress template")
        .progress_chars("##-")
}

/// 按名称累计各个阶段的耗时
#[derive(Debug, Default)]
pub struct TimeMeasure(pub HashMap<String, Duration>);

impl TimeMeasure {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn measure<F, R>(&mut self, key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let r = f();
        *self.0.entry(key.to_owned()).or_default() += start.elapsed();
        r
    }

    pub fn get(&self, key: &str) -> Duration {
        self.0.get(key).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_measure_accumulates() {
        let mut tm = TimeMeasure::new();
        let a = tm.measure("encode", || 1 + 1);
        tm.measure("encode", || std::thread::sleep(Duration::from_millis(1)));
        assert_eq!(a, 2);
        assert!(tm.get("encode") >= Duration::from_millis(1));
        assert_eq!(tm.get("missing"), Duration::ZERO);
    }
}

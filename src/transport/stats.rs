// src/transport/stats.rs

//! Per-mirror transport statistics and the mirror chooser

use super::RepoUri;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// Statistics shared between transport workers; one lock per mirror
pub type SharedRepoStats = Arc<Mutex<RepoStats>>;

// Quality weights
const N_USED: u64 = 20;
const C_USED: f64 = 10.0;
const C_SPEED: f64 = 100.0;
const C_CONN_SPEED: f64 = 66.0;
const C_ERROR: f64 = 500.0;
const C_CONTENT_ERR: f64 = 1000.0;
const C_OSPEED_NONE: f64 = 100_000.0;
const C_OCSPEED_NONE: f64 = 1.0;

/// Transient error penalty kept per ranking pass
const ERR_DECAY_RATE: f64 = 0.999;

/// Observed behavior of one repository mirror
///
/// A mirror becomes "used" the first time anything is recorded against it
/// and stays used.
#[derive(Debug, Clone)]
pub struct RepoStats {
    url: String,
    scheme: String,
    priority: u32,

    err_decay: f64,
    failed_tx: u64,
    content_err: u64,
    decayable_err: u64,
    timeout_err: u64,
    total_tx: u64,
    consecutive_errors: u64,

    connections: u64,
    connect_time: f64,

    used: bool,

    bytes_xfr: u64,
    seconds_xfr: f64,
    origin_speed: f64,
    origin_cspeed: f64,
}

impl RepoStats {
    pub fn new(repouri: &RepoUri) -> Self {
        Self {
            url: repouri.normalized().to_string(),
            scheme: repouri.scheme().to_string(),
            priority: repouri.priority.unwrap_or(0),
            err_decay: 0.0,
            failed_tx: 0,
            content_err: 0,
            decayable_err: 0,
            timeout_err: 0,
            total_tx: 0,
            consecutive_errors: 0,
            connections: 0,
            connect_time: 0.0,
            used: false,
            bytes_xfr: 0,
            seconds_xfr: 0.0,
            origin_speed: 0.0,
            origin_cspeed: 0.0,
        }
    }

    /// A transaction against this mirror was started
    pub fn record_tx(&mut self) {
        self.used = true;
        self.total_tx += 1;
    }

    /// Bytes moved and time spent on a transfer
    pub fn record_progress(&mut self, bytes: u64, seconds: f64) {
        self.used = true;
        self.bytes_xfr += bytes;
        self.seconds_xfr += seconds;
    }

    /// Time spent establishing a connection
    pub fn record_connection(&mut self, seconds: f64) {
        self.used = true;
        self.connections += 1;
        self.connect_time += seconds;
    }

    /// A failed operation
    ///
    /// `decayable` errors are transient and their penalty fades over
    /// ranking passes; `content` errors mean the mirror served bad data.
    /// Anything else is a plain failure. Timeouts are counted on top of
    /// whichever class applies.
    pub fn record_error(&mut self, decayable: bool, content: bool, timeout: bool) {
        self.used = true;
        self.consecutive_errors += 1;
        if decayable {
            self.decayable_err += 1;
            self.err_decay += 1.0;
        } else if content {
            self.content_err += 1;
        } else {
            self.failed_tx += 1;
        }
        if timeout {
            self.timeout_err += 1;
        }
    }

    /// Called once a transaction completes
    pub fn clear_consecutive_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Forget transfer and error history before the next operation
    ///
    /// Connection counts and times are kept so latency still informs the
    /// ranking.
    pub fn reset(&mut self) {
        self.bytes_xfr = 0;
        self.seconds_xfr = 0.0;
        self.failed_tx = 0;
        self.content_err = 0;
        self.decayable_err = 0;
        self.err_decay = 0.0;
        self.total_tx = 0;
        self.consecutive_errors = 0;
        self.origin_speed = 0.0;
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn used(&self) -> bool {
        self.used
    }

    pub fn bytes_xfr(&self) -> u64 {
        self.bytes_xfr
    }

    pub fn seconds_xfr(&self) -> f64 {
        self.seconds_xfr
    }

    pub fn num_connect(&self) -> u64 {
        self.connections
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors
    }

    pub fn timeout_errors(&self) -> u64 {
        self.timeout_err
    }

    pub fn total_tx(&self) -> u64 {
        self.total_tx
    }

    /// Plain, content and transient failures together
    pub fn failures(&self) -> u64 {
        self.failed_tx + self.content_err + self.decayable_err
    }

    /// Transactions that did not fail; negative if errors outran transactions
    pub fn success(&self) -> i64 {
        self.total_tx as i64 - self.failures() as i64
    }

    /// Average connect time in seconds
    ///
    /// A mirror that only ever timed out reports one second.
    pub fn connect_time(&self) -> f64 {
        if self.connections == 0 {
            if self.used && self.timeout_err > 0 {
                return 1.0;
            }
            return 0.0;
        }
        self.connect_time / self.connections as f64
    }

    /// Average bytes per second; zero before any time is recorded
    pub fn transfer_speed(&self) -> f64 {
        if self.seconds_xfr == 0.0 {
            return 0.0;
        }
        self.bytes_xfr as f64 / self.seconds_xfr
    }

    /// Hint from the origin servers, used to scale the speed terms
    pub fn set_origin_speeds(&mut self, speed: Option<f64>, cspeed: Option<f64>) {
        if let Some(speed) = speed {
            self.origin_speed = speed;
        }
        if let Some(cspeed) = cspeed {
            self.origin_cspeed = cspeed;
        }
    }

    /// Deterministic score; higher is better
    ///
    /// Little-used mirrors get a bonus that shrinks as transactions
    /// accumulate. Transfer speed relative to the origins adds, connect time
    /// and errors subtract, content errors weighing double.
    pub fn quality(&self) -> i64 {
        let ospeed = if self.origin_speed > 0.0 {
            self.origin_speed
        } else {
            C_OSPEED_NONE
        };
        let ocspeed = if self.origin_cspeed > 0.0 {
            self.origin_cspeed
        } else {
            C_OCSPEED_NONE
        };

        let unused_bonus = if self.total_tx < N_USED {
            C_USED * ((N_USED - self.total_tx) as f64).powi(2)
        } else {
            0.0
        };
        let speed = self.bytes_xfr as f64 / (0.001 + self.seconds_xfr);

        let q = unused_bonus + C_SPEED * (speed / ospeed).powi(2)
            - C_CONN_SPEED * (self.connect_time() / ocspeed).powi(2)
            - C_CONTENT_ERR * (self.content_err as f64).powi(2)
            - C_ERROR * (self.failed_tx as f64 + self.err_decay).powi(2);
        q as i64
    }

    fn decay_errors(&mut self) {
        self.err_decay *= ERR_DECAY_RATE;
    }
}

/// Container of mirror statistics that orders mirrors for the transport
///
/// The map lock is held only to find or insert an entry; every entry has
/// its own lock, so workers reporting on different mirrors never contend.
#[derive(Debug, Default)]
pub struct RepoChooser {
    repos: Mutex<HashMap<String, SharedRepoStats>>,
}

impl RepoChooser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for a mirror, created on first reference
    pub fn stats_for(&self, repouri: &RepoUri) -> SharedRepoStats {
        let mut repos = self.repos.lock();
        repos
            .entry(repouri.normalized().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RepoStats::new(repouri))))
            .clone()
    }

    /// Statistics for a URL, if the mirror has been seen
    pub fn lookup(&self, url: &str) -> Option<SharedRepoStats> {
        self.repos.lock().get(url.trim_end_matches('/')).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.repos.lock().contains_key(url.trim_end_matches('/'))
    }

    pub fn len(&self) -> usize {
        self.repos.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.lock().is_empty()
    }

    /// How many of the given mirrors have been used; unknown ones are added
    pub fn get_num_visited(&self, repouris: &[RepoUri]) -> usize {
        repouris
            .iter()
            .map(|r| self.stats_for(r))
            .filter(|rs| rs.lock().used())
            .count()
    }

    /// Mirrors in preference order, fewest failures then fewest successes
    ///
    /// Origins contribute their average transfer and connect speeds as the
    /// yardstick for each mirror's quality score. Every call decays the
    /// transient error penalty of the listed mirrors.
    pub fn get_repostats(
        &self,
        repouris: &[RepoUri],
        origins: &[RepoUri],
    ) -> Vec<(SharedRepoStats, RepoUri)> {
        let (mut speed, mut speed_count) = (0.0, 0u32);
        let (mut cspeed, mut cspeed_count) = (0.0, 0u32);
        for origin in origins {
            let rs = self.stats_for(origin);
            let rs = rs.lock();
            if rs.bytes_xfr() > 0 {
                speed += rs.transfer_speed();
                speed_count += 1;
            }
            if rs.connect_time() > 0.0 {
                cspeed += rs.connect_time();
                cspeed_count += 1;
            }
        }
        let avg_speed = (speed_count > 0).then(|| speed / speed_count as f64);
        let avg_cspeed = (cspeed_count > 0).then(|| cspeed / cspeed_count as f64);

        let mut found: Vec<((u64, i64), SharedRepoStats, RepoUri)> = repouris
            .iter()
            .map(|ruri| {
                let shared = self.stats_for(ruri);
                let key = {
                    let mut rs = shared.lock();
                    rs.set_origin_speeds(avg_speed, avg_cspeed);
                    rs.decay_errors();
                    (rs.failures(), rs.success())
                };
                (key, shared, ruri.clone())
            })
            .collect();
        found.sort_by_key(|(key, _, _)| *key);

        debug!(
            "Mirror ranking: {}",
            found
                .iter()
                .map(|((failures, success), _, ruri)| format!(
                    "{} (failures {}, success {})",
                    ruri.normalized(),
                    failures,
                    success
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );
        found
            .into_iter()
            .map(|(_, shared, ruri)| (shared, ruri))
            .collect()
    }

    /// Forget every mirror
    pub fn clear(&self) {
        self.repos.lock().clear();
    }

    /// Reset every mirror's statistics
    pub fn reset(&self) {
        for rs in self.repos.lock().values() {
            rs.lock().reset();
        }
    }

    /// Table of all mirrors, one row per mirror, sorted by URL
    pub fn dump(&self) -> String {
        let mut entries: Vec<(String, SharedRepoStats)> = self
            .repos
            .lock()
            .iter()
            .map(|(url, rs)| (url.clone(), Arc::clone(rs)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<31} {:<6} {:<4} {:<4} {:<10} {:<10} {:<5} {:<8} {:<4}",
            "URL", "Good", "Err", "Conn", "Speed", "Size", "Used", "CSpeed", "Qual"
        );
        for (_, entry) in entries {
            let rs = entry.lock();
            let url: String = rs.url().chars().take(31).collect();
            let _ = writeln!(
                out,
                "{:<31} {:<6} {:<4} {:<4} {:<10} {:<10} {:<5} {:<8.4} {:<4}",
                url,
                rs.success(),
                rs.failures(),
                rs.num_connect(),
                format!("{}/s", bytes_to_str(rs.transfer_speed() as u64)),
                bytes_to_str(rs.bytes_xfr()),
                rs.used(),
                rs.connect_time(),
                rs.quality()
            );
        }
        out
    }
}

/// Human-readable byte count
fn bytes_to_str(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters() {
        let mut rs = RepoStats::new(&RepoUri::new("http://mirror.example.com/"));
        assert_eq!(rs.url(), "http://mirror.example.com");
        assert_eq!(rs.scheme(), "http");
        assert!(!rs.used());
        assert_eq!(rs.transfer_speed(), 0.0);

        for _ in 0..4 {
            rs.record_tx();
        }
        rs.record_error(false, false, false);
        rs.record_error(true, false, true);
        rs.record_error(false, true, false);
        assert!(rs.used());
        assert_eq!(rs.failures(), 3);
        assert_eq!(rs.success(), 1);
        assert_eq!(rs.consecutive_errors(), 3);
        assert_eq!(rs.timeout_errors(), 1);

        rs.clear_consecutive_errors();
        assert_eq!(rs.consecutive_errors(), 0);

        rs.record_progress(2048, 2.0);
        assert_eq!(rs.transfer_speed(), 1024.0);
    }

    #[test]
    fn test_connect_time() {
        let mut rs = RepoStats::new(&RepoUri::new("http://m"));
        assert_eq!(rs.connect_time(), 0.0);
        rs.record_error(false, false, true);
        assert_eq!(rs.connect_time(), 1.0);
        rs.record_connection(0.5);
        rs.record_connection(1.5);
        assert_eq!(rs.connect_time(), 1.0);
        assert_eq!(rs.num_connect(), 2);
    }

    #[test]
    fn test_reset_keeps_connections() {
        let mut rs = RepoStats::new(&RepoUri::new("http://m"));
        rs.record_tx();
        rs.record_error(false, false, false);
        rs.record_connection(0.25);
        rs.record_progress(100, 1.0);
        rs.reset();
        assert_eq!(rs.failures(), 0);
        assert_eq!(rs.total_tx(), 0);
        assert_eq!(rs.bytes_xfr(), 0);
        assert_eq!(rs.num_connect(), 1);
        assert_eq!(rs.connect_time(), 0.25);
        assert!(rs.used());
    }

    #[test]
    fn test_quality_is_deterministic() {
        let fresh = RepoStats::new(&RepoUri::new("http://a"));
        assert_eq!(fresh.quality(), 4000);
        assert_eq!(fresh.quality(), fresh.quality());

        let mut failing = RepoStats::new(&RepoUri::new("http://b"));
        failing.record_tx();
        failing.record_error(false, false, false);
        // 10 * 19^2 - 500 * 1^2
        assert_eq!(failing.quality(), 3110);

        let mut corrupt = RepoStats::new(&RepoUri::new("http://c"));
        corrupt.record_tx();
        corrupt.record_error(false, true, false);
        assert!(corrupt.quality() < failing.quality());
    }

    #[test]
    fn test_chooser_ordering() {
        let chooser = RepoChooser::new();
        let a = RepoUri::new("http://a/");
        let b = RepoUri::new("http://b");
        let c = RepoUri::new("http://c");

        {
            let rs = chooser.stats_for(&a);
            let mut rs = rs.lock();
            for _ in 0..5 {
                rs.record_tx();
            }
        }
        {
            let rs = chooser.stats_for(&b);
            let mut rs = rs.lock();
            rs.record_tx();
            rs.record_error(false, false, false);
        }

        let ranked = chooser.get_repostats(&[a.clone(), b.clone(), c.clone()], &[]);
        let keys: Vec<(u64, i64)> = ranked
            .iter()
            .map(|(rs, _)| {
                let rs = rs.lock();
                (rs.failures(), rs.success())
            })
            .collect();
        assert_eq!(keys, vec![(0, 0), (0, 5), (1, 0)]);
        assert_eq!(ranked[0].1, c);
        assert_eq!(ranked[2].1, b);
    }

    #[test]
    fn test_trailing_slash_shares_entry() {
        let chooser = RepoChooser::new();
        chooser.stats_for(&RepoUri::new("http://a/")).lock().record_tx();
        let rs = chooser.lookup("http://a").unwrap();
        assert_eq!(rs.lock().total_tx(), 1);
        assert!(chooser.contains("http://a/"));
        assert_eq!(chooser.len(), 1);
    }

    #[test]
    fn test_num_visited_and_clear() {
        let chooser = RepoChooser::new();
        let uris = vec![RepoUri::new("http://a"), RepoUri::new("http://b")];
        assert_eq!(chooser.get_num_visited(&uris), 0);
        assert_eq!(chooser.len(), 2);

        chooser.stats_for(&uris[1]).lock().record_connection(0.1);
        assert_eq!(chooser.get_num_visited(&uris), 1);

        chooser.reset();
        assert_eq!(chooser.get_num_visited(&uris), 1);
        chooser.clear();
        assert!(chooser.is_empty());
    }

    #[test]
    fn test_origin_speed_scales_quality() {
        let chooser = RepoChooser::new();
        let origin = RepoUri::new("http://origin");
        let mirror = RepoUri::new("http://mirror");
        chooser.stats_for(&origin).lock().record_progress(1000, 1.0);
        chooser.stats_for(&mirror).lock().record_progress(1000, 1.0);

        let ranked = chooser.get_repostats(std::slice::from_ref(&mirror), std::slice::from_ref(&origin));
        let rs = ranked[0].0.lock();
        // speed matches the origin so the speed term is close to C_SPEED
        assert!(rs.quality() > 4000 + 90);
    }

    #[test]
    fn test_concurrent_recording() {
        let chooser = Arc::new(RepoChooser::new());
        let uris: Vec<RepoUri> = (0..4).map(|i| RepoUri::new(format!("http://m{}", i))).collect();

        let handles: Vec<_> = uris
            .iter()
            .cloned()
            .map(|uri| {
                let chooser = Arc::clone(&chooser);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let rs = chooser.stats_for(&uri);
                        let mut rs = rs.lock();
                        rs.record_tx();
                        rs.record_progress(10, 0.01);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for uri in &uris {
            let rs = chooser.lookup(&uri.uri).unwrap();
            assert_eq!(rs.lock().total_tx(), 100);
            assert_eq!(rs.lock().bytes_xfr(), 1000);
        }
    }

    #[test]
    fn test_dump() {
        let chooser = RepoChooser::new();
        chooser.stats_for(&RepoUri::new("http://b")).lock().record_tx();
        chooser.stats_for(&RepoUri::new("http://a")).lock().record_progress(4096, 1.0);
        let table = chooser.dump();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("URL"));
        assert!(lines[1].starts_with("http://a"));
        assert!(lines[1].contains("4.0 kB"));
    }

    #[test]
    fn test_bytes_to_str() {
        assert_eq!(bytes_to_str(512), "512 B");
        assert_eq!(bytes_to_str(1536), "1.5 kB");
        assert_eq!(bytes_to_str(3 * 1024 * 1024), "3.0 MB");
    }
}

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStatus {
    Clear,
    Banned { time_left: Duration },
    /// The ban had already lapsed; the entry was dropped on this check.
    Forgiven,
}

/// The per-IP ban table. Entries record when the ban started; expiry is
/// evaluated lazily on connect and in bulk by the periodic sweep.
#[derive(Debug)]
pub struct BanList {
    enabled: bool,
    ban_time: Duration,
    entries: Mutex<HashMap<IpAddr, Instant>>,
}

impl BanList {
    pub fn new(config: &BanningConfig) -> Self {
        Self {
            enabled: config.enabled,
            ban_time: config.time(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ban(&self, ip: IpAddr) {
        if self.enabled {
            self.entries
                .lock()
                .expect("ban table poisoned")
                .insert(ip, Instant::now());
        }
    }

    pub fn check(&self, ip: IpAddr) -> BanStatus {
        if !self.enabled {
            return BanStatus::Clear;
        }

        let mut entries = self.entries.lock().expect("ban table poisoned");

        let Some(banned_at) = entries.get(&ip) else {
            return BanStatus::Clear;
        };

        let elapsed = banned_at.elapsed();
        if elapsed < self.ban_time {
            BanStatus::Banned {
                time_left: self.ban_time - elapsed,
            }
        } else {
            entries.remove(&ip);
            BanStatus::Forgiven
        }
    }

    /// Drops every lapsed entry; returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock().expect("ban table poisoned");
        let before = entries.len();
        entries.retain(|_, banned_at| banned_at.elapsed() < self.ban_time);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ban table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maximum number of equivalent base URLs a picker can juggle.
pub const MAX_BASE_URLS: usize = 4;

/// Total request count after which all stats are cleared to give every
/// base URL a fresh chance.
const RESET_NB_REQUESTS: u32 = 10_000;

/// Approximate moving statistics of response times for one base URL.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct ResponseTimeStats {
    nb_requests: u32,
    avg_response_time_ms: u32,
    avg_deviation_ms: u32,
}

impl ResponseTimeStats {
    /// Lower is better; the average naturally weighs more than the
    /// deviation as they are simply summed.
    fn score(&self) -> u64 {
        u64::from(self.avg_response_time_ms) + u64::from(self.avg_deviation_ms)
    }
}

/// Picks the most promising base URL among equivalent ones based on
/// measured response times.
///
/// Unprobed URLs score zero and therefore get tried first; afterwards the
/// URL minimizing `average + deviation` wins. Stats are periodically reset
/// so a temporarily slow host can redeem itself.
#[derive(Clone, Debug)]
pub struct BestUrlPicker {
    base_urls: Vec<&'static str>,
    stats: Vec<ResponseTimeStats>,
}

impl BestUrlPicker {
    pub fn new(base_urls: &[&'static str]) -> Self {
        assert!(
            !base_urls.is_empty() && base_urls.len() <= MAX_BASE_URLS,
            "between 1 and {MAX_BASE_URLS} base URLs expected"
        );
        BestUrlPicker {
            base_urls: base_urls.to_vec(),
            stats: vec![ResponseTimeStats::default(); base_urls.len()],
        }
    }

    pub fn single(base_url: &'static str) -> Self {
        Self::new(&[base_url])
    }

    pub fn nb_base_urls(&self) -> usize {
        self.base_urls.len()
    }

    /// Position of the base URL the next query should use.
    pub fn next_base_url_pos(&self) -> usize {
        self.stats
            .iter()
            .enumerate()
            .min_by_key(|(_, stats)| stats.score())
            .map(|(pos, _)| pos)
            .unwrap_or_default()
    }

    pub fn next_base_url(&self) -> &'static str {
        self.base_urls[self.next_base_url_pos()]
    }

    pub fn base_url(&self, pos: usize) -> &'static str {
        self.base_urls[pos]
    }

    /// Folds one measured response time into the picked URL's stats.
    pub fn store_response_time(&mut self, pos: usize, response_time_ms: u32) {
        let stats = &mut self.stats[pos];
        stats.nb_requests += 1;
        let n = stats.nb_requests;
        // Approximate moving average and deviation instead of storing the
        // last n samples.
        stats.avg_response_time_ms = ((u64::from(stats.avg_response_time_ms)
            * u64::from(n - 1)
            + u64::from(response_time_ms))
            / u64::from(n)) as u32;
        let deviation = stats.avg_response_time_ms.abs_diff(response_time_ms);
        stats.avg_deviation_ms = ((u64::from(stats.avg_deviation_ms) * u64::from(n - 1)
            + u64::from(deviation))
            / u64::from(n)) as u32;

        if self.nb_requests_done() >= RESET_NB_REQUESTS {
            for stats in &mut self.stats {
                *stats = ResponseTimeStats::default();
            }
        }
    }

    pub fn nb_requests_done(&self) -> u32 {
        self.stats.iter().map(|stats| stats.nb_requests).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLS: [&str; 3] = [
        "https://api.example.com",
        "https://api1.example.com",
        "https://api2.example.com",
    ];

    #[test]
    fn unprobed_urls_are_tried_first() {
        let mut picker = BestUrlPicker::new(&URLS);
        assert_eq!(picker.next_base_url_pos(), 0);
        picker.store_response_time(0, 50);
        assert_eq!(picker.next_base_url_pos(), 1);
        picker.store_response_time(1, 50);
        assert_eq!(picker.next_base_url_pos(), 2);
    }

    #[test]
    fn lower_average_wins() {
        let mut picker = BestUrlPicker::new(&URLS);
        for _ in 0..5 {
            picker.store_response_time(0, 200);
            picker.store_response_time(1, 90);
            picker.store_response_time(2, 140);
        }
        assert_eq!(picker.next_base_url_pos(), 1);
        assert_eq!(picker.next_base_url(), URLS[1]);
    }

    #[test]
    fn deviation_breaks_average_ties() {
        let mut picker = BestUrlPicker::new(&URLS[..2]);
        // Same average of 100, but URL 1 is much steadier.
        picker.store_response_time(0, 40);
        picker.store_response_time(0, 160);
        picker.store_response_time(1, 100);
        picker.store_response_time(1, 100);
        assert_eq!(picker.next_base_url_pos(), 1);
    }

    #[test]
    fn stats_reset_after_cap() {
        let mut picker = BestUrlPicker::new(&URLS[..2]);
        picker.store_response_time(0, 10);
        for _ in 0..10_000 {
            picker.store_response_time(1, 500);
        }
        assert_eq!(picker.nb_requests_done(), 0);
        assert_eq!(picker.next_base_url_pos(), 0);
    }

    #[test]
    #[should_panic]
    fn too_many_urls_is_a_programming_error() {
        let _ = BestUrlPicker::new(&[
            "https://a", "https://b", "https://c", "https://d", "https://e",
        ]);
    }
}

//! Game metrics collection, rendered as Prometheus text

use crate::games::types::{Amount, CashOutTrigger, Multiplier};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

pub struct GameMetrics {
    start_time: Instant,
    rounds_started: AtomicU64,
    rounds_crashed: AtomicU64,
    last_crash_point: AtomicU64,
    bets_placed: AtomicU64,
    bets_rejected: AtomicU64,
    manual_cash_outs: AtomicU64,
    auto_cash_outs: AtomicU64,
    bets_lost: AtomicU64,
    staked_cents: AtomicU64,
    paid_out_cents: AtomicU64,
    credit_retries: AtomicU64,
    credit_failures: AtomicU64,
    history_write_failures: AtomicU64,
    http_requests_total: AtomicU64,
    ws_clients: AtomicI64,
}

impl Default for GameMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GameMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_started: AtomicU64::new(0),
            rounds_crashed: AtomicU64::new(0),
            last_crash_point: AtomicU64::new(0),
            bets_placed: AtomicU64::new(0),
            bets_rejected: AtomicU64::new(0),
            manual_cash_outs: AtomicU64::new(0),
            auto_cash_outs: AtomicU64::new(0),
            bets_lost: AtomicU64::new(0),
            staked_cents: AtomicU64::new(0),
            paid_out_cents: AtomicU64::new(0),
            credit_retries: AtomicU64::new(0),
            credit_failures: AtomicU64::new(0),
            history_write_failures: AtomicU64::new(0),
            http_requests_total: AtomicU64::new(0),
            ws_clients: AtomicI64::new(0),
        }
    }

    pub fn record_round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round_crashed(&self, crash_point: Multiplier) {
        self.rounds_crashed.fetch_add(1, Ordering::Relaxed);
        self.last_crash_point.store(crash_point.hundredths(), Ordering::Relaxed);
    }

    pub fn record_bet_placed(&self, stake: Amount) {
        self.bets_placed.fetch_add(1, Ordering::Relaxed);
        self.staked_cents.fetch_add(stake.cents(), Ordering::Relaxed);
    }

    pub fn record_bet_rejected(&self) {
        self.bets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cash_out(&self, payout: Amount, trigger: CashOutTrigger) {
        match trigger {
            CashOutTrigger::Manual => self.manual_cash_outs.fetch_add(1, Ordering::Relaxed),
            CashOutTrigger::Auto => self.auto_cash_outs.fetch_add(1, Ordering::Relaxed),
        };
        self.paid_out_cents.fetch_add(payout.cents(), Ordering::Relaxed);
    }

    pub fn record_loss(&self) {
        self.bets_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credit_retry(&self) {
        self.credit_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credit_failure(&self) {
        self.credit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_history_write_failure(&self) {
        self.history_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_client_connected(&self) -> i64 {
        self.ws_clients.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ws_client_disconnected(&self) -> i64 {
        self.ws_clients.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn rounds_crashed(&self) -> u64 {
        self.rounds_crashed.load(Ordering::Relaxed)
    }

    pub fn bets_placed(&self) -> u64 {
        self.bets_placed.load(Ordering::Relaxed)
    }

    /// Realized return to player over all settled stakes
    pub fn realized_rtp(&self) -> f64 {
        let staked = self.staked_cents.load(Ordering::Relaxed);
        if staked == 0 {
            return 0.0;
        }
        self.paid_out_cents.load(Ordering::Relaxed) as f64 / staked as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters: [(&str, &str, u64); 12] = [
            ("aviator_rounds_started_total", "Rounds that entered Running", self.rounds_started.load(Ordering::Relaxed)),
            ("aviator_rounds_crashed_total", "Rounds that crashed", self.rounds_crashed.load(Ordering::Relaxed)),
            ("aviator_bets_placed_total", "Accepted bets", self.bets_placed.load(Ordering::Relaxed)),
            ("aviator_bets_rejected_total", "Rejected bet placements", self.bets_rejected.load(Ordering::Relaxed)),
            ("aviator_manual_cash_outs_total", "Manual cash-outs", self.manual_cash_outs.load(Ordering::Relaxed)),
            ("aviator_auto_cash_outs_total", "Automatic cash-outs", self.auto_cash_outs.load(Ordering::Relaxed)),
            ("aviator_bets_lost_total", "Bets lost to a crash", self.bets_lost.load(Ordering::Relaxed)),
            ("aviator_staked_cents_total", "Total stake in cents", self.staked_cents.load(Ordering::Relaxed)),
            ("aviator_paid_out_cents_total", "Total payout in cents", self.paid_out_cents.load(Ordering::Relaxed)),
            ("aviator_credit_retries_total", "Credits queued for retry", self.credit_retries.load(Ordering::Relaxed)),
            ("aviator_credit_failures_total", "Credits abandoned after retries", self.credit_failures.load(Ordering::Relaxed)),
            ("aviator_http_requests_total", "Total number of HTTP requests", self.http_requests_total.load(Ordering::Relaxed)),
        ];

        for (name, help, value) in counters {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
            );
        }

        let _ = write!(
            output,
            "# HELP aviator_history_write_failures_total Archived rounds that could not be stored\n\
             # TYPE aviator_history_write_failures_total counter\n\
             aviator_history_write_failures_total {}\n\n",
            self.history_write_failures.load(Ordering::Relaxed)
        );

        let _ = write!(
            output,
            "# HELP aviator_last_crash_point Crash point of the last finished round\n\
             # TYPE aviator_last_crash_point gauge\n\
             aviator_last_crash_point {:.2}\n\n",
            self.last_crash_point.load(Ordering::Relaxed) as f64 / 100.0
        );

        let _ = write!(
            output,
            "# HELP aviator_realized_rtp Paid out divided by staked\n\
             # TYPE aviator_realized_rtp gauge\n\
             aviator_realized_rtp {:.4}\n\n",
            self.realized_rtp()
        );

        let _ = write!(
            output,
            "# HELP aviator_websocket_clients Connected WebSocket clients\n\
             # TYPE aviator_websocket_clients gauge\n\
             aviator_websocket_clients {}\n\n",
            self.ws_clients.load(Ordering::SeqCst)
        );

        let _ = write!(
            output,
            "# HELP aviator_uptime_seconds Process uptime\n\
             # TYPE aviator_uptime_seconds counter\n\
             aviator_uptime_seconds {}\n",
            self.uptime_seconds()
        );

        output
    }
}

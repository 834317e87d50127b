//! Connect-4 Arena Server entry point.
//!
//! Loads configuration, wires the repository/clock/analytics capabilities
//! into the session and matchmaking core, and spawns the hub's accept loop
//! alongside the matchmaking tick, session sweeper, and analytics worker
//! tasks. There is no single global loop — each of these runs as an
//! independent tokio task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use connect4_arena::analytics::{AnalyticsProducer, BreakerConfig, LoggingEventSink};
use connect4_arena::clock::SystemClock;
use connect4_arena::repository::{InMemoryGameRepository, InMemoryStatsRepository};
use connect4_arena::{Hub, MatchmakingScheduler, ServerConfig, SessionManager, VERSION};

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to install tracing subscriber");

    info!("Connect-4 Arena Server v{VERSION}");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration, exiting");
            std::process::exit(1);
        }
    };

    // The real deployment swaps these for database-backed implementations;
    // the core is wired only against the `GameRepository`/`StatsRepository`/
    // `EventSink` capability traits so that swap never touches session,
    // matchmaking, or hub code.
    let repo = Arc::new(InMemoryGameRepository::new());
    let stats = Arc::new(InMemoryStatsRepository::new());
    let clock = Arc::new(SystemClock);
    let analytics = AnalyticsProducer::new(
        Arc::new(LoggingEventSink::new()),
        config.analytics_queue_soft_cap,
        BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            success_threshold: config.breaker_success_threshold,
            cooldown: config.breaker_cooldown,
        },
    );

    let sessions = SessionManager::new(
        repo,
        stats,
        clock.clone(),
        analytics.clone(),
        config.disconnect_grace,
        config.session_retention,
        config.repository_timeout,
    );
    let matchmaking = MatchmakingScheduler::new(sessions.clone(), clock, config.bot_escalation_deadline);
    let hub = Hub::new(sessions.clone(), matchmaking.clone(), config.clone());

    let matchmaking_task = tokio::spawn({
        let matchmaking = matchmaking.clone();
        let interval = config.matchmaking_tick_interval;
        async move { matchmaking.run(interval).await }
    });

    let sweeper_task = tokio::spawn({
        let sessions = sessions.clone();
        let interval = config.sweep_interval;
        async move { run_sweeper(sessions, interval).await }
    });

    let analytics_task = tokio::spawn(async move { analytics.run().await });

    let hub_task = tokio::spawn(async move {
        if let Err(err) = hub.run().await {
            error!(error = %err, "hub accept loop exited");
        }
    });

    let _ = tokio::join!(matchmaking_task, sweeper_task, analytics_task, hub_task);
}

/// Periodically forfeits sessions whose disconnect grace window expired and
/// evicts long-completed sessions from memory.
async fn run_sweeper(sessions: Arc<SessionManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for session in sessions.get_active_sessions().await {
            sessions.forfeit_if_expired(session.id).await;
        }
        sessions.sweep_retention().await;
    }
}

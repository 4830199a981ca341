pub mod affinity;
pub mod audit;
pub mod bus;
pub mod cache;
pub mod combat;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod identity;
pub mod lock;
pub mod models;
pub mod movement;
pub mod progression;
pub mod race;
pub mod ratelimit;
pub mod routes;
pub mod session;
pub mod zone;

use affinity::AffinityEngine;
use audit::AuditLog;
use bus::BroadcastBus;
use cache::{FakeCache, KvCache, RedisCache};
use combat::CombatEngine;
use config::Settings;
use db::Db;
use identity::Identity;
use lock::DistributedLock;
use movement::MovementEngine;
use progression::ProgressionEngine;
use race::RaceCatalogue;
use ratelimit::RateLimiter;
use session::SessionStore;
use std::sync::Arc;
use zone::ZoneEngine;

/// Everything a route or connection handler needs, bundled into one managed
/// value instead of a dozen separate `.manage()` calls — this crate's
/// engines are mutually dependent enough (movement needs zones, combat
/// needs affinity, everything needs the lock and the limiter) that
/// threading them through individually just duplicates this struct at
/// every call site.
pub struct AppState {
    pub db: Arc<Db>,
    pub cache: Arc<dyn KvCache>,
    pub lock: Arc<DistributedLock>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionStore>,
    pub audit: Arc<AuditLog>,
    pub bus: Arc<BroadcastBus>,
    pub settings: Arc<Settings>,
    pub identity: Arc<Identity>,
    pub races: Arc<RaceCatalogue>,
    pub zones: Arc<ZoneEngine>,
    pub movement: Arc<MovementEngine>,
    pub progression: Arc<ProgressionEngine>,
    pub affinity: Arc<AffinityEngine>,
    pub combat: Arc<CombatEngine>,
}

impl AppState {
    pub fn assemble(db_path: &str, cache: Arc<dyn KvCache>, settings: Settings) -> Arc<Self> {
        Self::assemble_with_bus(db_path, cache, settings, Arc::new(BroadcastBus::new_local_only()))
    }

    pub fn assemble_with_bus(db_path: &str, cache: Arc<dyn KvCache>, settings: Settings, bus: Arc<BroadcastBus>) -> Arc<Self> {
        let db = Arc::new(Db::new(db_path));
        let settings = Arc::new(settings);
        let lock = Arc::new(DistributedLock::new(cache.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(cache.clone()));
        let sessions = Arc::new(SessionStore::new(cache.clone(), settings.session_ttl_secs, settings.session_cap_per_account));
        let audit = Arc::new(AuditLog::new(db.clone()));
        let identity = Arc::new(Identity::new(db.clone(), cache.clone(), sessions.clone(), audit.clone(), settings.clone()));
        let races = Arc::new(RaceCatalogue::new(db.clone(), cache.clone()));
        let zones = Arc::new(ZoneEngine::new(db.clone(), cache.clone()));
        let movement = Arc::new(MovementEngine::new(db.clone(), zones.clone(), lock.clone(), rate_limiter.clone()));
        let progression = Arc::new(ProgressionEngine::new(db.clone(), lock.clone()));
        let affinity = Arc::new(AffinityEngine::new(db.clone(), lock.clone(), rate_limiter.clone()));
        let combat = Arc::new(CombatEngine::new(db.clone(), lock.clone(), rate_limiter.clone(), affinity.clone()));

        Arc::new(Self {
            db,
            cache,
            lock,
            rate_limiter,
            sessions,
            audit,
            bus,
            settings,
            identity,
            races,
            zones,
            movement,
            progression,
            affinity,
            combat,
        })
    }
}

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init().ok();

    let settings = Settings::from_env();
    let db_path = settings.database_path.clone();
    let redis_url = settings.redis_url.clone();

    // Connecting the cache is async (the connection manager pings the
    // server on construction); the launcher that owns the tokio runtime
    // hasn't started yet at this point, so a short-lived runtime bootstraps
    // it once before handing off to Rocket's own.
    let runtime = tokio::runtime::Runtime::new().expect("failed to start bootstrap runtime");
    let cache: Arc<dyn KvCache> = match runtime.block_on(RedisCache::connect(&redis_url)) {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            tracing::warn!(error = %e, "redis unreachable at startup, falling back to in-process cache");
            Arc::new(FakeCache::default())
        }
    };

    let bus = match BroadcastBus::with_redis(&redis_url) {
        Ok(bus) => {
            bus.spawn_redis_subscriber();
            Arc::new(bus)
        }
        Err(e) => {
            tracing::warn!(error = %e, "redis unreachable for bus fan-out, falling back to single-replica broadcast");
            Arc::new(BroadcastBus::new_local_only())
        }
    };

    let state = AppState::assemble_with_bus(&db_path, cache, settings, bus);
    build_rocket(state)
}

/// Redis-free builder for tests: an in-process `FakeCache` stands in for the
/// remote store so the suite never depends on a running Redis instance.
pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
    let state = AppState::assemble(db_path, cache, Settings::from_env());
    build_rocket(state)
}

fn build_rocket(state: Arc<AppState>) -> rocket::Rocket<rocket::Build> {
    rocket::build()
        .manage(state)
        .register("/", rocket::catchers![routes::not_found, routes::too_many_requests])
        .mount(
            "/",
            rocket::routes![
                routes::system::health,
                routes::system::readiness,
                routes::auth::register,
                routes::auth::sign_in,
                routes::auth::refresh,
                routes::auth::sign_out,
                routes::auth::me,
                routes::auth::forgot_password,
                routes::auth::reset_password,
                routes::characters::create_character,
                routes::characters::list_characters,
                routes::characters::get_character,
                routes::characters::delete_character,
                routes::characters::list_races,
                routes::characters::name_available,
                routes::zones::look,
                routes::zones::move_character,
                routes::zones::location,
                routes::zones::movement_history,
                routes::zones::teleport,
                routes::combat::start,
                routes::combat::action,
                routes::combat::flee,
                routes::combat::get,
                routes::combat::active,
                routes::progression::award,
                routes::progression::phases,
                routes::progression::curve,
                routes::progression::level_for_experience,
                routes::affinity::list_for_character,
                routes::affinity::all,
                routes::affinity::get_one,
                routes::affinity::bonus,
                routes::affinity::award,
                routes::ws::connect,
            ],
        )
}

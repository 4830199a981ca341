//! Race catalogue. Races are operator-seeded and effectively static, so the
//! catalogue loads once per process and is cached without an expiry; a
//! restart is the only way it changes.

use crate::cache::{self, KvCache};
use crate::db::Db;
use crate::models::Race;
use std::sync::Arc;

const CATALOGUE_KEY: &str = "races:catalogue";

pub struct RaceCatalogue {
    db: Arc<Db>,
    cache: Arc<dyn KvCache>,
}

impl RaceCatalogue {
    pub fn new(db: Arc<Db>, cache: Arc<dyn KvCache>) -> Self {
        Self { db, cache }
    }

    pub async fn list(&self) -> Vec<Race> {
        if let Some(races) = cache::get::<Vec<Race>>(self.cache.as_ref(), CATALOGUE_KEY).await {
            return races;
        }
        let races = self.load_from_db();
        let _ = cache::set(self.cache.as_ref(), CATALOGUE_KEY, &races, 0).await;
        races
    }

    pub async fn get(&self, race_id: &str) -> Option<Race> {
        self.list().await.into_iter().find(|r| r.id == race_id)
    }

    fn load_from_db(&self) -> Vec<Race> {
        let conn = self.db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, str_mod, vit_mod, dex_mod, int_mod, wis_mod, exp_bonus_multiplier, starting_gold, starting_zone_key FROM races ORDER BY name")
            .expect("race catalogue query is static");
        let rows = stmt
            .query_map([], |row| {
                Ok(Race {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    str_mod: row.get(2)?,
                    vit_mod: row.get(3)?,
                    dex_mod: row.get(4)?,
                    int_mod: row.get(5)?,
                    wis_mod: row.get(6)?,
                    exp_bonus_multiplier: row.get(7)?,
                    starting_gold: row.get(8)?,
                    starting_zone_key: row.get(9)?,
                })
            })
            .expect("race catalogue query is static");
        rows.filter_map(Result::ok).collect()
    }
}

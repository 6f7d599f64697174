//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise the create/update/find/delete pipeline end to end.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Configuration comes from `VELLUM_*` environment variables; without
//! `VELLUM_DB_PATH` the demo runs against an in-memory database.

use log::info;
use std::error::Error;
use vellum_core::{
    init_logging_from_config, open_with_config, shutdown_logging, Entity, EntityManager,
    EntityState, Field, Record, StateToken, StoreConfig, DEFAULT_VIEW_ID,
};

#[derive(Debug, Default, Clone)]
struct Sku {
    entity: EntityState,
    price: f64,
}

impl Record for Sku {
    fn entity(&self) -> &EntityState {
        &self.entity
    }

    fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
        &mut self.entity
    }
}

impl Entity for Sku {
    fn schema() -> Vec<Field<Self>> {
        vec![Field::attribute("price", |s: &Sku| &s.price, |s, v| s.price = v)]
    }
}

#[derive(Debug, Default, Clone)]
struct Variant {
    entity: EntityState,
    title: String,
    skus: Vec<Sku>,
}

impl Record for Variant {
    fn entity(&self) -> &EntityState {
        &self.entity
    }

    fn entity_mut(&mut self, _: StateToken) -> &mut EntityState {
        &mut self.entity
    }
}

impl Entity for Variant {
    fn schema() -> Vec<Field<Self>> {
        vec![
            Field::attribute("title", |v: &Variant| &v.title, |v, t| v.title = t),
            Field::relations("skus", |v: &Variant| v.skus.as_slice()),
        ]
    }
}

fn main() {
    let config = StoreConfig::from_env();
    if let Err(err) = init_logging_from_config(&config) {
        eprintln!("vellum logging disabled: {err}");
    }

    let outcome = run(&config);
    shutdown_logging();

    if let Err(err) = outcome {
        eprintln!("vellum demo failed: {err}");
        std::process::exit(1);
    }
}

fn run(config: &StoreConfig) -> Result<(), Box<dyn Error>> {
    let conn = open_with_config(config)?;
    let manager = EntityManager::new(&conn);

    let mut sku = Sku {
        price: 999.0,
        ..Sku::default()
    };
    sku.set_attribute("currency", "EUR")?;
    let sku = manager.create(&sku, DEFAULT_VIEW_ID)?;

    let variant = manager.create(
        &Variant {
            title: "Fox Socks".to_string(),
            skus: vec![sku.clone()],
            ..Variant::default()
        },
        DEFAULT_VIEW_ID,
    )?;
    println!(
        "variant id={} commit={} skus={:?}",
        variant.identifier(),
        variant.commit_id(),
        variant.relations_by_entity("sku")
    );

    let mut repriced = sku.clone();
    repriced.price = 1299.0;
    let repriced = manager.update(&repriced)?;
    println!(
        "sku id={} commit={} price={}",
        repriced.identifier(),
        repriced.commit_id(),
        repriced.price
    );

    for commit_id in variant.relations_by_entity("sku") {
        let pinned: Sku = manager.find_by_commit(*commit_id)?;
        println!(
            "variant pins sku commit={} price={} attributes={}",
            commit_id,
            pinned.price,
            serde_json::to_string(pinned.attributes())?
        );
    }

    let history = manager.history(sku.identifier(), DEFAULT_VIEW_ID)?;
    println!("sku history={:?}", history.iter().map(|v| v.id).collect::<Vec<_>>());

    manager.delete(variant.identifier(), DEFAULT_VIEW_ID)?;
    let deleted = manager.find::<Variant>(variant.identifier(), DEFAULT_VIEW_ID);
    match deleted {
        Ok(_) => println!("variant after delete: still visible"),
        Err(err) => println!("variant after delete: {err}"),
    }

    info!("event=cli_demo module=cli status=ok");
    Ok(())
}

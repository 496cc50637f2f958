#![cfg(feature = "integration-tests")]

use chrono::{DateTime, TimeZone, Utc};
use common::domain::{MeterReading, Reading, VehicleReading};
use common::postgres::{MigrationRunner, PostgresClient, PostgresConfig};
use fleet_engine::{EngineConfig, FleetEngine, FleetStorage};
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

async fn setup_engine() -> (ContainerAsync<Postgres>, FleetEngine) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let goose_path = which::which("goose").expect("goose binary not found");
    let config = PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        migrations_dir: format!(
            "{}/../fleet_all_in_one/migrations/postgres",
            env!("CARGO_MANIFEST_DIR")
        ),
        goose_binary_path: goose_path.to_string_lossy().to_string(),
        ..PostgresConfig::default()
    };

    MigrationRunner::from_config(&config)
        .run_migrations()
        .await
        .expect("Migrations failed");

    let client = PostgresClient::new(&config).expect("Failed to create client");
    let engine = FleetEngine::new(EngineConfig::default(), FleetStorage::postgres(client))
        .expect("Failed to build engine");
    (postgres, engine)
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 14, hour, minute, 0).unwrap()
}

fn vehicle(kwh: f64, ts: DateTime<Utc>) -> Reading {
    Reading::Vehicle(VehicleReading {
        vehicle_id: "V1".to_string(),
        soc_percent: 55.0,
        kwh_delivered_dc: kwh,
        battery_temp_c: 30.0,
        charge_power_kw: Some(11.0),
        timestamp: ts,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_concurrent_same_vehicle_ingestion_loses_nothing() {
    let (_container, engine) = setup_engine().await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for minute in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.ingest_one(vehicle(1.0, at(10, minute))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = engine.scan_vehicle_history("V1", at(0, 0), at(23, 59)).await.unwrap();
    assert_eq!(history.len(), 20);

    let status = engine.get_vehicle_status("V1").await.unwrap();
    assert!((status.daily_kwh_delivered - 20.0).abs() < 1e-9);
    assert_eq!(status.last_reading_at, at(10, 19));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_fleet_summary_resolves_links_in_bulk() {
    let (_container, engine) = setup_engine().await;

    engine.set_correlation("M1", "V1").await.unwrap();
    engine.ingest_one(vehicle(8.0, at(10, 5))).await.unwrap();
    engine
        .ingest_one(Reading::Meter(MeterReading {
            meter_id: "M1".to_string(),
            kwh_consumed_ac: 10.0,
            voltage: 240.0,
            current_a: None,
            timestamp: at(10, 0),
        }))
        .await
        .unwrap();

    let fleet = engine.get_fleet_summary(at(9, 0), at(12, 0)).await.unwrap();
    assert_eq!(fleet.vehicle_count, 1);
    assert_eq!(fleet.total_consumed_kwh, 10.0);
    assert_eq!(fleet.vehicles_with_warnings, 1);
}

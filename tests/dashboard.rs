use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dose_dashboard::config::DashboardConfig;
use dose_dashboard::data::loader::{load_file, ColumnMapping};
use dose_dashboard::data::model::Dataset;
use dose_dashboard::memo::{
    Aggregator, CachePolicy, FileBackend, FixedDelay, MemoryBackend, Selection,
};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

const HEADER: &str = "data_rap_zgonu;plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow";

fn write_dataset(rows: &[(&str, u32, &str, u64)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for (sex, age, dose, deaths) in rows {
        writeln!(file, "2022-01-27;{sex};{age};{dose};{deaths}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn scenario_file() -> NamedTempFile {
    write_dataset(&[("M", 40, "0", 5), ("M", 45, "0", 3), ("K", 50, "1", 2)])
}

fn load(file: &NamedTempFile) -> Arc<Dataset> {
    Arc::new(load_file(file.path(), &ColumnMapping::default()).unwrap())
}

#[test]
fn male_selection_sums_per_dose() {
    let file = scenario_file();
    let agg = Aggregator::builder(load(&file))
        .backend(Arc::new(MemoryBackend::new()))
        .build();
    let entry = agg
        .get_aggregate(&Selection::all().with_sexes(["M"]).with_age_range(1, 100))
        .unwrap();
    assert_eq!(entry.aggregate.pairs(), vec![("0", 8)]);
}

#[test]
fn shared_store_is_reused_by_another_process() {
    let file = scenario_file();
    let store = tempfile::tempdir().unwrap();
    let sel = Selection::all().with_sexes(["K", "M"]).with_age_range(30, 80);

    let first = Aggregator::builder(load(&file))
        .backend(Arc::new(FileBackend::open(store.path()).unwrap()))
        .namespace("deaths-test")
        .build();
    let computed = first.get_aggregate(&sel).unwrap();
    assert_eq!(first.stats().computations, 1);

    // A fresh aggregator over a fresh backend handle: as after a restart.
    let second = Aggregator::builder(load(&file))
        .backend(Arc::new(FileBackend::open(store.path()).unwrap()))
        .namespace("deaths-test")
        .build();
    let reused = second
        .get_aggregate(&Selection::all().with_sexes(["M", "K"]).with_age_range(30, 80))
        .unwrap();
    assert_eq!(*reused, *computed);
    assert_eq!(second.stats().computations, 0);
    assert_eq!(second.stats().hits, 1);

    // Another namespace does not see those entries.
    let other = Aggregator::builder(load(&file))
        .backend(Arc::new(FileBackend::open(store.path()).unwrap()))
        .namespace("other-dataset")
        .build();
    other.get_aggregate(&sel).unwrap();
    assert_eq!(other.stats().computations, 1);
}

#[test]
fn cache_hit_skips_the_simulated_cost() {
    let file = scenario_file();
    let delay = Duration::from_millis(300);
    let agg = Aggregator::builder(load(&file))
        .backend(Arc::new(MemoryBackend::new()))
        .cost(Arc::new(FixedDelay(delay)))
        .build();
    let sel = Selection::all();

    let started = Instant::now();
    agg.get_aggregate(&sel).unwrap();
    assert!(started.elapsed() >= delay);

    let started = Instant::now();
    agg.get_aggregate(&sel).unwrap();
    assert!(started.elapsed() < delay / 3);
    assert_eq!(agg.stats().computations, 1);
}

#[test]
fn recompute_policy_pays_every_time() {
    let file = scenario_file();
    let agg = Aggregator::builder(load(&file))
        .policy(CachePolicy::Recompute)
        .build();
    let a = agg.get_aggregate(&Selection::all()).unwrap();
    let b = agg.get_aggregate(&Selection::all()).unwrap();
    assert_eq!(*a, *b);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(agg.stats().computations, 2);
}

#[test]
fn age_window_keeps_every_row_in_range() {
    let rows: Vec<(&str, u32, &str, u64)> = (50..=65)
        .flat_map(|age| [("M", age, "0", 1), ("K", age, "1", 1)])
        .collect();
    let file = write_dataset(&rows);
    let dataset = load(&file);
    let agg = Aggregator::builder(Arc::clone(&dataset)).build();

    let entry = agg
        .get_aggregate(&Selection::all().with_age_range(55, 60))
        .unwrap();
    let ages: BTreeSet<u32> = entry
        .rows
        .iter()
        .map(|&i| dataset.records()[i].age)
        .collect();
    assert_eq!(ages, (55..=60).collect());
    assert_eq!(entry.rows.len(), 12);
    assert_eq!(entry.aggregate.pairs(), vec![("0", 6), ("1", 6)]);
}

#[test]
fn single_sex_rows_are_that_sex_only() {
    let file = scenario_file();
    let dataset = load(&file);
    let agg = Aggregator::builder(Arc::clone(&dataset)).build();
    let entry = agg
        .get_aggregate(&Selection::all().with_sexes(["M"]))
        .unwrap();
    let sexes: BTreeSet<&str> = entry
        .rows
        .iter()
        .map(|&i| dataset.records()[i].sex.as_str())
        .collect();
    assert_eq!(sexes, BTreeSet::from(["M"]));
}

#[test]
fn configuration_wires_the_shared_store() {
    let file = scenario_file();
    let store = tempfile::tempdir().unwrap();
    let vars: HashMap<&str, String> = HashMap::from([
        ("DASHBOARD_DATA", file.path().display().to_string()),
        ("DASHBOARD_CACHE", "shared".to_string()),
        ("DASHBOARD_CACHE_DIR", store.path().display().to_string()),
        ("DASHBOARD_COMPUTE_DELAY_MS", "0".to_string()),
    ]);
    let config = DashboardConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

    let dataset = Arc::new(load_file(&config.data_path, &config.columns).unwrap());
    let agg = config.build_aggregator(dataset).unwrap();
    let entry = agg.get_aggregate(&Selection::all()).unwrap();
    assert_eq!(entry.aggregate.pairs(), vec![("0", 8), ("1", 2)]);
    assert_eq!(agg.backend_name(), "file");
    assert_eq!(std::fs::read_dir(store.path()).unwrap().count(), 1);
}

#[test]
fn shared_store_ignores_entries_of_an_edited_file() {
    let store = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let path = data.path().join("deaths.csv");
    let write = |scale: u64| {
        let mut text = format!("{HEADER}\n");
        for (sex, age, dose, deaths) in [("M", 40, "0", 5u64), ("K", 50, "1", 2)] {
            text.push_str(&format!("2022-01-27;{sex};{age};{dose};{}\n", deaths * scale));
        }
        std::fs::write(&path, text).unwrap();
    };
    let vars = HashMap::from([
        ("DASHBOARD_DATA", path.display().to_string()),
        ("DASHBOARD_CACHE", "shared".to_string()),
        ("DASHBOARD_CACHE_DIR", store.path().display().to_string()),
        ("DASHBOARD_COMPUTE_DELAY_MS", "0".to_string()),
    ]);
    let config = DashboardConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
    let run = || {
        let dataset = Arc::new(load_file(&config.data_path, &config.columns).unwrap());
        let agg = config.build_aggregator(dataset).unwrap();
        let entry = agg.get_aggregate(&Selection::all()).unwrap();
        let pairs: Vec<(String, u64)> = entry
            .aggregate
            .pairs()
            .into_iter()
            .map(|(dose, deaths)| (dose.to_string(), deaths))
            .collect();
        (pairs, agg.stats())
    };

    write(1);
    let (first, _) = run();
    assert_eq!(first, vec![("0".to_string(), 5), ("1".to_string(), 2)]);

    // Same name, same row count, different contents.
    write(10);
    let (second, stats) = run();
    assert_eq!(second, vec![("0".to_string(), 50), ("1".to_string(), 20)]);
    assert_eq!(stats.computations, 1);

    // Unchanged contents still reuse the stored entry.
    let (third, stats) = run();
    assert_eq!(third, second);
    assert_eq!(stats.computations, 0);
}

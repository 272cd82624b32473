use std::fs;
use std::path::Path;

use lifecourse_indexer::{
    IndexClient, IndexerError, Indexer, MemoryIndex, RunConfig, RunReport, SqliteStore,
    TranscribedIndexer,
};
use serde_json::Value;
use tempfile::{TempDir, tempdir};

const LIFECOURSES: &str = "life_course_id,link_ids\n1,\"1,2,5\"\n2,3\n3,\"4,404\"\n";

const LINKS: &str = "\
link_id,source_id1,pa_id1,source_id2,pa_id2,method_id,score
1,1,10,2,20,m1,0.9
2,2,20,3,30,m1,0.8
3,1,11,2,21,m2,0.7
4,1,12,2,22,m2,0.6
5,2,20,1,10,m3,0.5
";

const SOURCE_HEADER: &str =
    "source_id,source_name,source_type,source_year,event_type,file_reference,original_data_reference";

const SOURCE_ROWS: [&str; 3] = [
    "1,Census 1801,census,1801,census,standardized/census_1801.csv,transcribed/census_1801.csv",
    "2,Census 1834,census,1834,census,standardized/census_1834.csv,",
    "3,Burials,burial_protocol,1850,burial,standardized/burials.csv,transcribed/burials.csv",
];

const CENSUS_1801: &str = "\
pa_id,source_id,name_cl,first_names,family_names,gender,age,event_year
10,1,jens hansen,Jens,Hansen,m,20,
11,1,ole nielsen,Ole,Nielsen,m,30,
12,1,karen jensdatter,Karen,Jensdatter,f,25,
";

const CENSUS_1801_TRANSCRIBED: &str = "pa_id,navn,alder\n10,Jens Hansen,20\n11,Ole Nielsen,30\n99,Ukendt,1\n";

const CENSUS_1834: &str = "\
pa_id,source_id,name_cl,first_names,family_names,gender,age,event_year
20,2,jens hansen,Jens,Hansen,m,53,
21,2,ole nielsen,Ole,Nielsen,m,63,
22,2,karen jensdatter,Karen,Jensdatter,f,58,
";

const BURIALS: &str = "\
pa_id,source_id,name_cl,first_names,family_names,gender,age,event_year
30,3,jens hansen,Jens,Hansen,m,69,1850
";

const BURIALS_TRANSCRIBED: &str = "pa_id,navn\n30,Jens Hansen\n";

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write fixture");
}

fn write_sources(root: &Path, rows: &[&str]) {
    let mut contents = format!("{SOURCE_HEADER}\n");
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    write(root, "auxilary_data/sources/sources.csv", &contents);
}

fn dataset() -> TempDir {
    let dir = tempdir().expect("tmp");
    let root = dir.path();
    write(root, "life-courses/life_courses.csv", LIFECOURSES);
    write(root, "links/links.csv", LINKS);
    write_sources(root, &SOURCE_ROWS);
    write(root, "standardized/census_1801.csv", CENSUS_1801);
    write(root, "standardized/census_1834.csv", CENSUS_1834);
    write(root, "standardized/burials.csv", BURIALS);
    write(root, "transcribed/census_1801.csv", CENSUS_1801_TRANSCRIBED);
    write(root, "transcribed/burials.csv", BURIALS_TRANSCRIBED);
    dir
}

fn config(root: &Path, version: &str) -> RunConfig {
    RunConfig::builder(root)
        .transcribed_root(root)
        .data_version(version)
        .batch_size(2)
        .build()
}

fn run(config: &RunConfig, index: &MemoryIndex) -> lifecourse_indexer::Result<RunReport> {
    let mut store = SqliteStore::open_in_memory().expect("store");
    Indexer::new(config, index).with_store(&mut store).run()
}

fn lifecourse(index: &MemoryIndex, life_course_id: u64) -> Value {
    index
        .documents("lifecourses")
        .into_iter()
        .find(|doc| doc["life_course_id"] == life_course_id)
        .expect("lifecourse document")
}

fn appearance_keys(doc: &Value) -> Vec<String> {
    let mut keys: Vec<String> = doc["person_appearance"]
        .as_array()
        .expect("appearances")
        .iter()
        .map(|pa| pa["key"].as_str().expect("key").to_string())
        .collect();
    keys.sort();
    keys
}

#[test]
fn full_run_publishes_and_activates_every_alias() {
    let dir = dataset();
    let index = MemoryIndex::new();
    let mut store = SqliteStore::open_in_memory().expect("store");
    let config = config(dir.path(), "7.0");
    let report = Indexer::new(&config, &index)
        .with_store(&mut store)
        .run()
        .expect("run");

    assert_eq!(report.data_version, "7.0");
    assert_eq!(report.lifecourses, 2);
    assert_eq!(report.assembly.dangling, 1);
    assert_eq!(report.links.raw, 5);
    assert_eq!(report.activated.len(), 3);
    assert_eq!(report.stored, Some(2));
    assert_eq!(store.count(false).expect("count"), 2);

    for alias in ["pas", "lifecourses", "sources"] {
        assert_eq!(index.alias_targets(alias).len(), 1, "{alias} should be bound");
    }
    assert_eq!(index.document_count("sources"), 3);
    // 12 has no transcription and 99 no standardized row.
    assert_eq!(index.document_count("pas"), 6);
    assert!(index.get_document("pas", "1-99").expect("get").is_none());
    assert!(
        index
            .documents("pas")
            .iter()
            .all(|pa| pa["data_version"] == "7.0")
    );

    let census = report
        .sources
        .iter()
        .find(|source| source.source_id == 1)
        .expect("census report");
    assert_eq!(census.merge.merged, 2);
    assert_eq!(census.merge.unmatched, 1);

    let first = lifecourse(&index, 1);
    assert_eq!(appearance_keys(&first), vec!["1-10", "2-20", "3-30"]);
    assert_eq!(first["event_year_sortable"], 1801);
    assert_eq!(first["first_name_sortable"], "jens");
    assert_eq!(first["birth_year_sortable"], 1781);
    assert_eq!(first["data_version"], "7.0");

    let second = lifecourse(&index, 2);
    assert_eq!(appearance_keys(&second), vec!["1-11", "2-21"]);
    assert!(
        index
            .documents("lifecourses")
            .iter()
            .all(|doc| doc["life_course_id"] != 3)
    );
}

#[test]
fn missing_source_file_rolls_back_and_keeps_previous_generation() {
    let dir = dataset();
    let index = MemoryIndex::new();
    run(&config(dir.path(), "1.0"), &index).expect("first run");
    let before: Vec<Vec<String>> = ["pas", "lifecourses", "sources"]
        .iter()
        .map(|alias| index.alias_targets(alias))
        .collect();
    let indices_before = index.indices();

    fs::remove_file(dir.path().join("standardized/burials.csv")).expect("remove");
    let err = run(&config(dir.path(), "2.0"), &index).expect_err("missing file");
    assert!(matches!(err, IndexerError::MissingFile { .. }));

    let after: Vec<Vec<String>> = ["pas", "lifecourses", "sources"]
        .iter()
        .map(|alias| index.alias_targets(alias))
        .collect();
    assert_eq!(before, after);
    assert_eq!(index.indices(), indices_before);
    assert!(
        index
            .documents("lifecourses")
            .iter()
            .all(|doc| doc["data_version"] == "1.0")
    );
}

#[test]
fn unreachable_engine_aborts_and_leaves_no_new_index() {
    let dir = dataset();
    let index = MemoryIndex::new();
    index.fail_bulk_for("lifecourses", true);
    let err = run(&config(dir.path(), "1.0"), &index).expect_err("unreachable");
    assert!(err.is_fatal());
    assert!(index.indices().is_empty());
    assert!(index.alias_targets("lifecourses").is_empty());
}

#[test]
fn rejected_batches_are_dropped_without_failing_the_run() {
    let dir = dataset();
    let index = MemoryIndex::new();
    index.fail_bulk_for("pas", false);
    let report = run(&config(dir.path(), "1.0"), &index).expect("run");
    assert!(report.publish.batches_dropped > 0);
    assert_eq!(index.document_count("pas"), 0);
    // Lifecourse updates do not depend on the appearance write succeeding.
    assert_eq!(appearance_keys(&lifecourse(&index, 1)).len(), 3);
}

#[test]
fn missing_data_version_fails_before_any_index_exists() {
    let dir = dataset();
    let index = MemoryIndex::new();
    let config = RunConfig::builder(dir.path()).build();
    let err = Indexer::new(&config, &index).run().expect_err("no version");
    assert!(matches!(err, IndexerError::Config(_)));
    assert!(index.indices().is_empty());
}

#[test]
fn bounded_run_only_publishes_referenced_appearances() {
    let dir = dataset();
    let index = MemoryIndex::new();
    let config = RunConfig::builder(dir.path())
        .transcribed_root(dir.path())
        .data_version("1.0")
        .max_entries(1)
        .build();
    let report = Indexer::new(&config, &index).run().expect("run");
    assert_eq!(report.lifecourses, 1);
    assert_eq!(report.stored, None);
    let mut keys: Vec<String> = index
        .documents("pas")
        .iter()
        .map(|pa| pa["key"].as_str().expect("key").to_string())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["1-10", "2-20", "3-30"]);
}

#[test]
fn skip_pas_keeps_previous_appearance_generation() {
    let dir = dataset();
    let index = MemoryIndex::new();
    run(&config(dir.path(), "1.0"), &index).expect("first run");
    let pas_before = index.alias_targets("pas");

    let config = RunConfig::builder(dir.path())
        .transcribed_root(dir.path())
        .data_version("2.0")
        .skip_pas(true)
        .skip_db(true)
        .build();
    let report = Indexer::new(&config, &index).run().expect("run");
    assert!(report.sources.is_empty());
    assert_eq!(index.alias_targets("pas"), pas_before);
    assert!(appearance_keys(&lifecourse(&index, 1)).is_empty());
}

#[test]
fn earliest_summary_is_independent_of_source_order() {
    let mut rng = fastrand::Rng::with_seed(42);
    for round in 0..6 {
        let dir = dataset();
        let mut rows = SOURCE_ROWS.to_vec();
        rng.shuffle(&mut rows);
        write_sources(dir.path(), &rows);

        let index = MemoryIndex::new();
        let config = RunConfig::builder(dir.path())
            .transcribed_root(dir.path())
            .data_version("1.0")
            .batch_size(1 + round % 3)
            .concurrency(1 + round % 3)
            .build();
        Indexer::new(&config, &index).run().expect("run");

        let first = lifecourse(&index, 1);
        assert_eq!(first["event_year_sortable"], 1801, "order {rows:?}");
        assert_eq!(first["first_name_sortable"], "jens");
        assert_eq!(appearance_keys(&first).len(), 3);
        let second = lifecourse(&index, 2);
        assert_eq!(second["event_year_sortable"], 1801);
    }
}

#[test]
fn readers_see_exactly_one_generation_during_activation() {
    let dir = dataset();
    let index = MemoryIndex::new();
    run(&config(dir.path(), "1.0"), &index).expect("first run");

    let done = std::sync::atomic::AtomicBool::new(false);
    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut reads = 0usize;
            while !done.load(std::sync::atomic::Ordering::Acquire) || reads == 0 {
                let docs = index.documents("pas");
                assert!(!docs.is_empty(), "alias must always resolve");
                let version = docs[0]["data_version"].clone();
                assert!(docs.iter().all(|doc| doc["data_version"] == version));
                reads += 1;
            }
            reads
        });
        run(&config(dir.path(), "2.0"), &index).expect("second run");
        done.store(true, std::sync::atomic::Ordering::Release);
        assert!(reader.join().expect("reader") > 0);
    });

    assert!(
        index
            .documents("pas")
            .iter()
            .all(|doc| doc["data_version"] == "2.0")
    );
    assert_eq!(index.list_indices("pas*").expect("list").len(), 1);
}

fn transcribed_config(root: &Path) -> RunConfig {
    RunConfig::builder(root)
        .transcribed_root(root)
        .batch_size(2)
        .build()
}

#[test]
fn transcribed_run_publishes_every_transcription_behind_its_alias() {
    let dir = dataset();
    let index = MemoryIndex::new();
    let report = TranscribedIndexer::new(&transcribed_config(dir.path()), &index)
        .run()
        .expect("run");

    // The 1834 census ships no transcribed file.
    assert_eq!(report.sources, 2);
    assert_eq!(report.published, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(index.alias_targets("transcribed").len(), 1);
    assert_eq!(index.document_count("transcribed"), 4);

    // Transcriptions are published whether or not a standardized row exists.
    let orphan = index
        .get_document("transcribed", "1-99")
        .expect("get")
        .expect("orphan transcription");
    assert_eq!(orphan["transcription"]["navn"], "Ukendt");
    let jens = index
        .get_document("transcribed", "1-10")
        .expect("get")
        .expect("transcription");
    assert_eq!(jens["source_id"], 1);
    assert_eq!(jens["transcription"]["alder"], "20");

    // No lifecourse alias is touched.
    assert!(index.alias_targets("lifecourses").is_empty());
    assert!(index.alias_targets("pas").is_empty());
}

#[test]
fn transcribed_run_respects_max_entries_and_replaces_the_previous_generation() {
    let dir = dataset();
    let index = MemoryIndex::new();
    TranscribedIndexer::new(&transcribed_config(dir.path()), &index)
        .run()
        .expect("first run");

    let config = RunConfig::builder(dir.path())
        .transcribed_root(dir.path())
        .max_entries(3)
        .build();
    let report = TranscribedIndexer::new(&config, &index).run().expect("bounded run");
    assert_eq!(report.published, 3);
    assert_eq!(index.document_count("transcribed"), 3);
    assert_eq!(index.list_indices("transcribed*").expect("list").len(), 1);
}

#[test]
fn transcribed_run_rolls_back_when_a_file_is_missing() {
    let dir = dataset();
    let index = MemoryIndex::new();
    TranscribedIndexer::new(&transcribed_config(dir.path()), &index)
        .run()
        .expect("first run");
    let before = index.alias_targets("transcribed");
    let indices_before = index.indices();

    fs::remove_file(dir.path().join("transcribed/burials.csv")).expect("remove");
    let err = TranscribedIndexer::new(&transcribed_config(dir.path()), &index)
        .run()
        .expect_err("missing file");
    assert!(matches!(err, IndexerError::MissingFile { .. }));
    assert_eq!(index.alias_targets("transcribed"), before);
    assert_eq!(index.indices(), indices_before);
    assert_eq!(index.document_count("transcribed"), 4);
}

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use facetflow::{App, Args};
use sched::{JobLauncher, JobOutcome, Operation};

const BANDS_JSON: &str = r#"{
  "field_ra": 10.5,
  "field_dec": 45.2,
  "bands": [
    {
      "freq_hz": 120000000.0,
      "nchan": 64,
      "chan_width_hz": 12200.0,
      "timestep_sec": 10.0,
      "files": ["band0.ms"],
      "has_sub_data": true
    },
    {
      "freq_hz": 130000000.0,
      "nchan": 64,
      "chan_width_hz": 12200.0,
      "timestep_sec": 10.0,
      "files": ["band1.ms"],
      "has_sub_data": true
    }
  ]
}"#;

const DIRECTIONS: &[(&str, f64, f64, f64)] = &[
    ("D0", 10.0, 45.0, 2.0),
    ("D1", 11.0, 45.5, 1.0),
    ("D2", 10.5, 46.0, 0.8),
    ("D3", 9.5, 44.2, 0.5),
    ("D4", 11.5, 44.5, 0.4),
    ("D5", 9.0, 45.8, 0.3),
];

/// Write a parset plus its band catalog and directions file into `dir`.
fn write_fixture(dir: &Path, ndir: usize, parset_extra: &str) -> Result<()> {
    std::fs::write(dir.join("bands.json"), BANDS_JSON)?;

    let mut directions = String::from("# name ra dec flux_jy\n");
    for (name, ra, dec, flux) in &DIRECTIONS[..ndir] {
        directions.push_str(&format!("{name} {ra} {dec} {flux}\n"));
    }
    std::fs::write(dir.join("directions.txt"), directions)?;

    let parset = format!(
        "[data]\n\
         band_catalog = \"bands.json\"\n\
         [directions]\n\
         file = \"directions.txt\"\n\
         {parset_extra}"
    );
    std::fs::write(dir.join("facetflow.toml"), parset)?;
    Ok(())
}

fn basic_args(dir: &Path, dry_run: bool) -> Args {
    Args {
        parset: dir.join("facetflow.toml").to_str().unwrap().to_owned(),
        working_dir: dir.join("run").to_str().unwrap().to_owned(),
        directions: Vec::with_capacity(0),
        reset: false,
        yes: true,
        verbose: 1,
        dry_run,
    }
}

fn load_state(dir: &Path, name: &str) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(dir.join("run/state").join(format!("{name}.json")))?;
    Ok(serde_json::from_str(&text)?)
}

fn stages(state: &serde_json::Value) -> Vec<String> {
    state["completed_stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_owned())
        .collect()
}

/// Counts launches; selfcal verification fails for the named directions.
struct TestLauncher {
    launches: Arc<AtomicUsize>,
    fail_selfcal: Vec<String>,
}

impl TestLauncher {
    fn new(launches: Arc<AtomicUsize>, fail_selfcal: &[&str]) -> Box<Self> {
        Box::new(Self {
            launches,
            fail_selfcal: fail_selfcal.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl JobLauncher for TestLauncher {
    fn launch(&self, op: &Operation) -> Result<JobOutcome, sched::Error> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let fail = op.name == "facetselfcal" && self.fail_selfcal.contains(&op.direction);
        Ok(JobOutcome {
            success: true,
            verify_ok: Some(!fail),
        })
    }
}

fn run_with_launcher(dir: &Path, launcher: Box<dyn JobLauncher>) -> Result<()> {
    let settings = basic_args(dir, false).try_into()?;
    App::with_launcher(settings, launcher).run()
}

#[test]
fn test_dry_run_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(dir.path(), 4, "groupings = [4]\n")?;

    let settings = basic_args(dir.path(), true).try_into()?;
    App::new(settings).run()?;

    // geometry cache and region files were written:
    assert!(dir.path().join("run/regions/facets.json").exists());
    assert!(dir.path().join("run/regions/facets.reg").exists());
    assert!(dir.path().join("run/regions/calimages.reg").exists());

    // every direction came out selfcal-ok with the full stage history:
    for name in ["D0", "D1", "D2", "D3"] {
        let state = load_state(dir.path(), name)?;
        assert_eq!(state["selfcal_ok"], true, "{name} selfcal_ok");
        assert_eq!(stages(&state), ["add", "selfcal", "subtract"]);
        // the image size invariant holds for persisted sizes:
        let imsize = state["facet_imsize"].as_u64().unwrap();
        assert!(imsize >= 512 && imsize % 2 == 0);
    }
    Ok(())
}

#[test]
fn test_resume_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        4,
        "groupings = [4]\n[cluster]\npipeline_executable = \"/bin/true\"\n",
    )?;

    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches.clone(), &[]))?;
    // 4 directions x (add, selfcal, subtract):
    assert_eq!(launches.load(Ordering::SeqCst), 12);

    let first: Vec<serde_json::Value> = ["D0", "D1", "D2", "D3"]
        .iter()
        .map(|n| load_state(dir.path(), n).unwrap())
        .collect();

    // a second run over the same state launches nothing and changes nothing:
    let relaunches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(relaunches.clone(), &[]))?;
    assert_eq!(relaunches.load(Ordering::SeqCst), 0);

    for (name, before) in ["D0", "D1", "D2", "D3"].iter().zip(first) {
        let after = load_state(dir.path(), name)?;
        assert_eq!(before, after, "{name} state changed across resume");
    }
    Ok(())
}

#[test]
fn test_success_propagation_from_first_group() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        6,
        "groupings = [2]\n[cluster]\npipeline_executable = \"/bin/true\"\n",
    )?;

    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches, &[]))?;

    // first success is in G1 = {D0, D1}: G2 and G3 get the flag, G1 doesn't.
    for name in ["D0", "D1"] {
        assert_eq!(load_state(dir.path(), name)?["use_new_sub_data"], false);
    }
    for name in ["D2", "D3", "D4", "D5"] {
        assert_eq!(load_state(dir.path(), name)?["use_new_sub_data"], true, "{name}");
    }
    Ok(())
}

#[test]
fn test_success_propagation_from_second_group() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        6,
        "groupings = [2]\n[cluster]\npipeline_executable = \"/bin/true\"\n",
    )?;

    // all of G1 fails selfcal, so the first success is in G2:
    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches, &["D0", "D1"]))?;

    for name in ["D0", "D1", "D2", "D3"] {
        assert_eq!(load_state(dir.path(), name)?["use_new_sub_data"], false, "{name}");
    }
    for name in ["D4", "D5"] {
        assert_eq!(load_state(dir.path(), name)?["use_new_sub_data"], true, "{name}");
    }
    Ok(())
}

#[test]
fn test_single_group_failure_resets_direction() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        4,
        "groupings = [4]\n\
         [cluster]\n\
         nodes = [{ name = \"node01\", cores = 8 }, { name = \"node02\", cores = 8 }]\n\
         ndir_per_node = 2\n\
         pipeline_executable = \"/bin/true\"\n",
    )?;

    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches.clone(), &["D1"]))?;

    // add + selfcal for all four, subtract only for the three that verified:
    assert_eq!(launches.load(Ordering::SeqCst), 11);

    // only one group existed, so nobody gets the new-sub-data flag:
    for name in ["D0", "D1", "D2", "D3"] {
        assert_eq!(load_state(dir.path(), name)?["use_new_sub_data"], false);
    }

    // the failed direction was reset back to just "add":
    let failed = load_state(dir.path(), "D1")?;
    assert_eq!(failed["selfcal_ok"], false);
    assert_eq!(stages(&failed), ["add"]);

    // its siblings went on to subtract:
    for name in ["D0", "D2", "D3"] {
        assert_eq!(stages(&load_state(dir.path(), name)?), ["add", "selfcal", "subtract"]);
    }
    Ok(())
}

#[test]
fn test_final_imaging_with_transferred_solutions() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        4,
        "groupings = [4]\n\
         transfer_selfcal = true\n\
         [imaging]\n\
         make_final_image = true\n\
         make_mosaic = true\n\
         [cluster]\n\
         pipeline_executable = \"/bin/true\"\n",
    )?;

    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches, &["D1"]))?;

    // the failed direction borrowed a neighbor's solutions and was imaged:
    let failed = load_state(dir.path(), "D1")?;
    let parmdb = failed["files"]["dir_dep_parmdb"].as_str().unwrap();
    assert!(parmdb.contains("facetselfcal"), "transferred parmdb: {parmdb}");
    let failed_stages = stages(&failed);
    assert!(failed_stages.contains(&"finalimage".to_owned()));

    // all four final images made it into the field's mosaic inputs:
    let field = load_state(dir.path(), "field")?;
    assert_eq!(field["facet_image_files"].as_array().unwrap().len(), 4);
    assert_eq!(field["facet_vertices_files"].as_array().unwrap().len(), 4);
    Ok(())
}

#[test]
fn test_target_facet_is_processed_like_a_direction() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(
        dir.path(),
        4,
        "groupings = [4]\n\
         transfer_selfcal = true\n\
         target_ra = 10.4\n\
         target_dec = 45.3\n\
         target_radius_deg = 0.05\n\
         target_has_own_facet = true\n\
         [imaging]\n\
         make_final_image = true\n\
         [cluster]\n\
         pipeline_executable = \"/bin/true\"\n",
    )?;

    let launches = Arc::new(AtomicUsize::new(0));
    run_with_launcher(dir.path(), TestLauncher::new(launches, &[]))?;

    // the target owns one of the five tessellated facets:
    let cache: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("run/regions/facets.json"))?)?;
    assert_eq!(cache.as_array().unwrap().len(), 5);

    // its polygon made it into the region file:
    let regions = std::fs::read_to_string(dir.path().join("run/regions/facets.reg"))?;
    assert!(regions.contains("text={target}"));

    // the target never selfcals, but is imaged with transferred solutions:
    let target = load_state(dir.path(), "target")?;
    assert!(!target["polygon"]["vertices"].as_array().unwrap().is_empty());
    let target_stages = stages(&target);
    assert!(!target_stages.contains(&"selfcal".to_owned()));
    assert!(target_stages.contains(&"finalimage".to_owned()));
    let parmdb = target["files"]["dir_dep_parmdb"].as_str().unwrap();
    assert!(parmdb.contains("facetselfcal"), "transferred parmdb: {parmdb}");

    // all five facet images feed the field's mosaic inputs:
    let field = load_state(dir.path(), "field")?;
    assert_eq!(field["facet_image_files"].as_array().unwrap().len(), 5);
    Ok(())
}

#[test]
fn test_reset_mode_clears_selfcal_state() -> Result<()> {
    let dir = tempdir()?;
    write_fixture(dir.path(), 4, "groupings = [4]\n")?;

    let settings = basic_args(dir.path(), true).try_into()?;
    App::new(settings).run()?;
    assert_eq!(stages(&load_state(dir.path(), "D2")?), ["add", "selfcal", "subtract"]);

    let mut args = basic_args(dir.path(), false);
    args.reset = true;
    args.directions = vec!["D2".to_owned()];
    let settings = args.try_into()?;
    App::new(settings).run()?;

    let state = load_state(dir.path(), "D2")?;
    assert_eq!(state["selfcal_ok"], false);
    assert_eq!(stages(&state), ["add", "subtract"]);
    Ok(())
}

#[test]
fn test_missing_directions_file_is_a_config_error() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("bands.json"), BANDS_JSON)?;
    std::fs::write(
        dir.path().join("facetflow.toml"),
        "[data]\nband_catalog = \"bands.json\"\n",
    )?;

    let result: Result<facetflow::Settings, _> = basic_args(dir.path(), true).try_into();
    assert!(result.is_err());
    Ok(())
}

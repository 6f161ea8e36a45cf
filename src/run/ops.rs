use anyhow::{Context, Result};
use serde_json::json;

use model::{Band, Direction, Field, Stage};
use sched::Operation;

use crate::fs::Fs;

// Names of the shared subtracted-data columns in the visibility files.
const SUB_COLUMN: &str = "SUBTRACTED_DATA_ALL";
const SUB_COLUMN_NEW: &str = "SUBTRACTED_DATA_ALL_NEW";

/// Build the operation advancing `stage` for one direction.
///
/// The parameter bundle carries everything the external job needs: the
/// direction's geometry and calibration parameters, the band file lists with
/// stage-appropriate averaging steps, and the cluster allocation.
pub fn stage_op(stage: Stage, d: &Direction, bands: &[Band], fs: &Fs) -> Result<Operation> {
    let work_dir = fs.op_dir(stage.name(), &d.name);
    let mut op = direction_params(Operation::new(stage, &d.name, work_dir), d)?
        .param("bands", band_params(stage, bands))
        .param(
            "input_column",
            if d.use_new_sub_data {
                SUB_COLUMN_NEW
            } else {
                SUB_COLUMN
            },
        )
        .resumed(d.is_complete(stage));

    op = match stage {
        Stage::Selfcal => op
            .param("solint_p", d.solint_p)
            .param("solint_a", d.solint_a)
            .param("max_residual_jy", d.max_residual_jy)
            // the job writes the solutions and its quality verdict here:
            .output("dir_dep_parmdb", "merged_selfcal_parmdb")
            .output("verify_subtract_ok", "verify_subtract_ok.txt"),
        Stage::Subtract => with_parmdb(op, d),
        Stage::FinalAdd => with_parmdb(op, d),
        Stage::FinalImage => with_parmdb(op, d)
            .output("facet_image", "facet_image.fits")
            .output("facet_vertices", "facet_vertices.json"),
        Stage::Add => op,
    };
    Ok(op)
}

/// One run-level operation combining every final facet image into a mosaic.
pub fn mosaic_op(field: &Field, fs: &Fs) -> Result<Operation> {
    let name = "makemosaic";
    let op = Operation::run_level(name, fs.op_dir(name, "field"))
        .param("ra", field.ra)
        .param("dec", field.dec)
        .param(
            "facet_images",
            serde_json::to_value(&field.facet_image_files).context("serializing image list")?,
        )
        .param(
            "facet_vertices",
            serde_json::to_value(&field.facet_vertices_files)
                .context("serializing vertex list")?,
        )
        .output("mosaic_image", "mosaic.fits");
    Ok(op)
}

fn direction_params(op: Operation, d: &Direction) -> Result<Operation> {
    let mut op = op
        .param("ra", d.ra)
        .param("dec", d.dec)
        .param("field_ra", d.field_ra)
        .param("field_dec", d.field_dec)
        .param("cal_size_deg", d.cal_size_deg)
        .param("cal_radius_deg", d.cal_radius_deg)
        .param("cal_imsize", d.cal_imsize)
        .param("cal_wplanes", d.cal_wplanes)
        .param("facet_imsize", d.facet_imsize)
        .param("facet_wplanes", d.facet_wplanes)
        .param("cellsize_selfcal_deg", d.cellsize_selfcal_deg)
        .param("cellsize_verify_deg", d.cellsize_verify_deg)
        .param("nbands", d.nbands)
        .param("nchannels", d.nchannels);
    if let Some(polygon) = &d.polygon {
        op = op.param(
            "facet_vertices",
            serde_json::to_value(polygon).context("serializing facet polygon")?,
        );
    }
    if let Some(width) = d.width_deg {
        op = op.param("facet_width_deg", width);
    }
    if let Some(hosts) = &d.hosts {
        op = op.param(
            "hosts",
            serde_json::to_value(hosts).context("serializing host allocation")?,
        );
    }
    Ok(op)
}

/// The direction-dependent solutions this direction should apply, either its
/// own selfcal product or one transferred from a neighbor.
fn with_parmdb(op: Operation, d: &Direction) -> Operation {
    match d.files.get("dir_dep_parmdb") {
        Some(parmdb) => op.param("dir_dep_parmdb", parmdb.display().to_string()),
        None => op,
    }
}

fn band_params(stage: Stage, bands: &[Band]) -> serde_json::Value {
    bands
        .iter()
        .map(|b| {
            let avg = b.averaging_steps();
            let (freqstep, timestep) = match stage {
                Stage::Selfcal => (avg.selfcal_freqstep, avg.selfcal_timestep),
                Stage::FinalImage => (avg.image_freqstep, avg.image_timestep),
                _ => (avg.initsubtract_freqstep, avg.initsubtract_timestep),
            };
            json!({
                "name": b.name,
                "freq_hz": b.freq_hz,
                "files": b.files,
                "parmdbs": b.parmdbs,
                "skymodel": b.skymodel,
                "freqstep": freqstep,
                "timestep": timestep,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{DirectionDef, DirectionDefaults};

    fn direction() -> Direction {
        let mut d = Direction::new(
            &DirectionDef {
                name: "D0".to_owned(),
                ra: 10.0,
                dec: 45.0,
                cal_flux_jy: Some(1.0),
                cal_size_deg: None,
            },
            &DirectionDefaults::default(),
        );
        d.width_deg = Some(1.0);
        d.set_image_sizes();
        d
    }

    fn band() -> Band {
        Band {
            name: "band_120.00MHz".to_owned(),
            freq_hz: 120e6,
            nchan: 64,
            chan_width_hz: 12.2e3,
            timestep_sec: 10.0,
            files: vec!["band0.ms".into()],
            parmdbs: vec![],
            has_sub_data: true,
            missing_channels: vec![],
            unflagged_fraction: 1.0,
            skymodel: None,
        }
    }

    fn fs() -> Fs {
        Fs::new(std::path::Path::new("/work"), true)
    }

    #[test]
    fn test_selfcal_op_declares_verification_output() {
        let op = stage_op(Stage::Selfcal, &direction(), &[band()], &fs()).unwrap();
        assert_eq!(op.name, "facetselfcal");
        assert!(op.outputs.contains_key("verify_subtract_ok"));
        assert!(op.outputs.contains_key("dir_dep_parmdb"));
        assert_eq!(op.params["solint_p"], 1);
        assert!(!op.resumed);
    }

    #[test]
    fn test_input_column_follows_sub_data_flag() {
        let mut d = direction();
        let op = stage_op(Stage::Add, &d, &[band()], &fs()).unwrap();
        assert_eq!(op.params["input_column"], SUB_COLUMN);

        d.use_new_sub_data = true;
        let op = stage_op(Stage::Add, &d, &[band()], &fs()).unwrap();
        assert_eq!(op.params["input_column"], SUB_COLUMN_NEW);
    }

    #[test]
    fn test_completed_stage_is_resumed() {
        let mut d = direction();
        d.record_stage(Stage::Add);
        let op = stage_op(Stage::Add, &d, &[band()], &fs()).unwrap();
        assert!(op.resumed);
    }

    #[test]
    fn test_band_averaging_per_stage() {
        let op = stage_op(Stage::Selfcal, &direction(), &[band()], &fs()).unwrap();
        let bands = op.params["bands"].as_array().unwrap();
        assert_eq!(bands[0]["timestep"], 12);
        assert_eq!(bands[0]["freqstep"], 64);
    }
}

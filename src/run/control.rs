use std::ops::Range;

use anyhow::{Context, Result};
use colored::Colorize;

use geom::angular_separation;
use model::{Band, Direction, Field, Stage, StateStore};
use sched::{divide_nodes, OpResult, OpStatus, Scheduler};

use crate::fs::Fs;
use crate::run::ops;
use crate::settings::Settings;
use crate::ui::Ui;

/// Mutable run state accumulated across groups. Only the single-threaded
/// control loop touches it, always between scheduler calls.
#[derive(Debug, Default)]
pub struct RunContext {
    /// Set once, at the first selfcal success anywhere in the run.
    improved_data: bool,
    /// Directions that did not complete successfully.
    failed: Vec<String>,
}

/// What the run accomplished, for the end-of-run report.
#[derive(Debug)]
pub struct RunSummary {
    pub n_directions: usize,
    pub n_selfcal_ok: usize,
    pub failed: Vec<String>,
}

/// Drives every direction through the stage sequence, group by group.
pub struct ControlLoop<'a> {
    pub settings: &'a Settings,
    pub fs: &'a Fs,
    pub ui: &'a Ui,
    pub store: &'a StateStore,
    pub scheduler: &'a Scheduler,
    pub bands: &'a [Band],
}

impl ControlLoop<'_> {
    pub fn run(&self, directions: &mut [Direction], field: &mut Field) -> Result<RunSummary> {
        let mut ctx = RunContext::default();

        // only the first `ndir_selfcal` directions go through the groups; the
        // rest (and the target facet, which sits last and never selfcals) can
        // still receive transferred solutions at the end:
        let parset_dirs = &self.settings.parset.directions;
        let n_eligible = directions.iter().filter(|d| !d.is_target).count();
        let n_selfcal = parset_dirs.ndir_selfcal.unwrap_or(n_eligible).min(n_eligible);

        let groups = group_directions(
            n_selfcal,
            parset_dirs.one_at_a_time,
            &parset_dirs.groupings,
        );
        log::info!(
            "processing {n_selfcal} of {} directions in {} groups",
            directions.len(),
            groups.len()
        );

        for (group_idx, group) in groups.iter().enumerate() {
            eprintln!(
                "\n{} {} ({} directions).",
                "Processing group".magenta(),
                group_idx + 1,
                group.len()
            );
            self.run_group(&mut ctx, directions, group)
                .with_context(|| format!("while processing group {}", group_idx + 1))?;
        }

        self.final_imaging(&mut ctx, directions, field)?;
        self.store.save(field).context("saving field state")?;

        // a direction can fail more than once (e.g. reset then excluded):
        let mut seen = util::HashSet::default();
        ctx.failed.retain(|name| seen.insert(name.clone()));

        let n_selfcal_ok = directions.iter().filter(|d| d.selfcal_ok).count();
        Ok(RunSummary {
            n_directions: directions.len(),
            n_selfcal_ok,
            failed: ctx.failed,
        })
    }

    fn run_group(
        &self,
        ctx: &mut RunContext,
        directions: &mut [Direction],
        group: &Range<usize>,
    ) -> Result<()> {
        // propagation starts strictly at the group after the first success:
        if ctx.improved_data {
            for d in &mut directions[group.clone()] {
                if !d.use_new_sub_data {
                    d.use_new_sub_data = true;
                    self.store.save(d)?;
                }
            }
        }

        let idxs: Vec<usize> = group.clone().collect();
        self.allocate_hosts(directions, &idxs);
        let added = self.run_stage(ctx, Stage::Add, directions, &idxs)?;
        let calibrated = self.run_selfcal(ctx, directions, &added)?;
        self.run_stage(ctx, Stage::Subtract, directions, &calibrated)?;

        self.cleanup_group(directions, &idxs)?;
        Ok(())
    }

    /// Attach a disjoint host allocation to each direction in the batch.
    fn allocate_hosts(&self, directions: &mut [Direction], idxs: &[usize]) {
        let cluster = &self.settings.parset.cluster;
        let hosts = divide_nodes(
            idxs.len(),
            &cluster.nodes,
            cluster.ndir_per_node(),
            cluster.ncpu(),
        );
        for (&i, h) in idxs.iter().zip(hosts) {
            directions[i].hosts = Some(h);
        }
    }

    /// Run one stage for a batch of directions; returns the indices that are
    /// fit for the next stage. A failed direction is excluded from the rest
    /// of the run but never aborts its siblings.
    fn run_stage(
        &self,
        ctx: &mut RunContext,
        stage: Stage,
        directions: &mut [Direction],
        idxs: &[usize],
    ) -> Result<Vec<usize>> {
        let results = self.schedule(stage, directions, idxs)?;

        let mut passed = Vec::with_capacity(idxs.len());
        for (&i, result) in idxs.iter().zip(results) {
            let d = &mut directions[i];
            if result.ok() {
                d.files.extend(result.outputs);
                d.record_stage(stage);
                passed.push(i);
            } else {
                eprintln!("{} failed for direction {}.", stage, d.name.cyan());
                ctx.failed.push(d.name.clone());
            }
            self.store.save(d)?;
        }
        Ok(passed)
    }

    /// Selfcal needs its own result handling: success is gated on the
    /// subtraction quality verdict, and failure goes through the override /
    /// reset policy instead of plain exclusion.
    fn run_selfcal(
        &self,
        ctx: &mut RunContext,
        directions: &mut [Direction],
        idxs: &[usize],
    ) -> Result<Vec<usize>> {
        let results = self.schedule(Stage::Selfcal, directions, idxs)?;

        let mut passed = Vec::with_capacity(idxs.len());
        for (&i, result) in idxs.iter().zip(results) {
            let d = &mut directions[i];
            match result.status {
                // resumed: the loaded state already has the verdict
                OpStatus::Skipped => {}
                OpStatus::Succeeded => {
                    d.files.extend(result.outputs);
                    // the verdict file is spent once read:
                    if let Some(verify) = d.files.remove("verify_subtract_ok") {
                        d.cleanup_files.push(verify);
                    }
                    d.selfcal_ok = result.verify_ok.unwrap_or(false);
                }
                OpStatus::Failed => d.selfcal_ok = false,
            }

            if !d.selfcal_ok {
                self.handle_selfcal_failure(ctx, d)?;
            }
            if d.selfcal_ok {
                d.record_stage(Stage::Selfcal);
                self.store.save(d)?;
                passed.push(i);
            }
        }

        if !ctx.improved_data && !passed.is_empty() {
            log::info!("first selfcal success; later groups will use the improved subtraction");
            ctx.improved_data = true;
        }
        Ok(passed)
    }

    /// Interactive mode lets the operator force-accept the result; otherwise
    /// the direction's selfcal state is reset so a later run can retry it.
    fn handle_selfcal_failure(&self, ctx: &mut RunContext, d: &mut Direction) -> Result<()> {
        eprintln!("Selfcal verification failed for direction {}.", d.name.cyan());
        let interactive = self.settings.parset.run.interactive;
        if interactive && self.ui.confirm("Accept the result anyway?")? {
            eprintln!("{} selfcal for {}.", "Force-accepting".magenta(), d.name.cyan());
            d.selfcal_ok = true;
            return Ok(());
        }
        self.store.reset(d, &self.fs.results_dir())?;
        ctx.failed.push(d.name.clone());
        Ok(())
    }

    fn schedule(
        &self,
        stage: Stage,
        directions: &[Direction],
        idxs: &[usize],
    ) -> Result<Vec<OpResult>> {
        let mut batch = Vec::with_capacity(idxs.len());
        for &i in idxs {
            batch.push(ops::stage_op(stage, &directions[i], self.bands, self.fs)?);
        }
        let results = self
            .scheduler
            .run(batch)
            .with_context(|| format!("while running {stage} operations"))?;
        Ok(results)
    }

    /// Delete each direction's intermediate products once its group is done.
    fn cleanup_group(&self, directions: &mut [Direction], idxs: &[usize]) -> Result<()> {
        for &i in idxs {
            let d = &mut directions[i];
            for file in std::mem::take(&mut d.cleanup_files) {
                if self.fs.exists(&file) {
                    self.fs.delete_file(&file)?;
                }
            }
            d.hosts = None;
            self.store.save(d)?;
        }
        Ok(())
    }
}

// FINAL IMAGING ////////////////
impl ControlLoop<'_> {
    fn final_imaging(
        &self,
        ctx: &mut RunContext,
        directions: &mut [Direction],
        field: &mut Field,
    ) -> Result<()> {
        let mut to_image: Vec<usize> = (0..directions.len())
            .filter(|&i| directions[i].make_final_image && directions[i].selfcal_ok)
            .collect();

        if self.settings.parset.directions.transfer_selfcal {
            self.transfer_solutions(ctx, directions, &mut to_image);
        }
        if to_image.is_empty() {
            log::info!("no directions to final-image");
            return Ok(());
        }

        eprintln!("\n{} ({} directions).", "Final imaging".magenta(), to_image.len());
        self.allocate_hosts(directions, &to_image);
        let added = self.run_stage(ctx, Stage::FinalAdd, directions, &to_image)?;
        let imaged = self.run_stage(ctx, Stage::FinalImage, directions, &added)?;

        for &i in &imaged {
            let d = &directions[i];
            if let Some(image) = d.files.get("facet_image") {
                field.facet_image_files.push(image.clone());
            }
            if let Some(vertices) = d.files.get("facet_vertices") {
                field.facet_vertices_files.push(vertices.clone());
            }
        }

        if self.settings.parset.imaging.make_mosaic && !field.facet_image_files.is_empty() {
            let op = ops::mosaic_op(field, self.fs)?;
            let results = self.scheduler.run(vec![op]).context("while running the mosaic")?;
            if let Some(result) = results.first() {
                if result.ok() {
                    if let Some(mosaic) = result.outputs.get("mosaic_image") {
                        eprintln!("{} {}.", "Mosaic written to".green(), mosaic.display());
                    }
                } else {
                    ctx.failed.push("field".to_owned());
                }
            }
        }
        Ok(())
    }

    /// Give each failed or never-selfcaled direction the solutions of its
    /// nearest successfully calibrated neighbor, and append it, individually,
    /// to the to-image set.
    fn transfer_solutions(
        &self,
        ctx: &RunContext,
        directions: &mut [Direction],
        to_image: &mut Vec<usize>,
    ) {
        let candidates: Vec<usize> = (0..directions.len())
            .filter(|&i| directions[i].make_final_image && !directions[i].selfcal_ok)
            .collect();

        for i in candidates {
            let Some(j) = nearest_calibrated(directions, i) else {
                log::warn!(
                    "no calibrated neighbor to transfer solutions to {}",
                    directions[i].name
                );
                continue;
            };
            let parmdb = directions[j].files.get("dir_dep_parmdb").cloned();
            let neighbor = directions[j].name.clone();
            let d = &mut directions[i];
            log::info!("transferring solutions from {} to {}", neighbor, d.name);
            if let Some(parmdb) = parmdb {
                d.files.insert("dir_dep_parmdb".to_owned(), parmdb);
            }
            // directions that never entered a group still consume the
            // improved subtraction if one exists by now:
            if ctx.improved_data && !d.is_complete(Stage::Add) {
                d.use_new_sub_data = true;
            }
            to_image.push(i);
        }
    }
}

/// Nearest (by angular distance) successfully calibrated direction.
fn nearest_calibrated(directions: &[Direction], from: usize) -> Option<usize> {
    let d = &directions[from];
    directions
        .iter()
        .enumerate()
        .filter(|(j, other)| *j != from && other.selfcal_ok)
        .min_by(|(_, a), (_, b)| {
            let da = angular_separation(d.ra, d.dec, a.ra, a.dec);
            let db = angular_separation(d.ra, d.dec, b.ra, b.dec);
            da.total_cmp(&db)
        })
        .map(|(j, _)| j)
}

/// Partition `0..n` into ordered groups: one-at-a-time, sizes cycled from
/// `groupings`, or everything at once.
pub fn group_directions(n: usize, one_at_a_time: bool, groupings: &[usize]) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    if one_at_a_time {
        return (0..n).map(|i| i..i + 1).collect();
    }
    if groupings.is_empty() {
        return vec![0..n];
    }
    let mut groups = Vec::new();
    let mut start = 0;
    let mut cycle = groupings.iter().cycle();
    while start < n {
        let size = *cycle.next().expect("groupings is non-empty");
        let end = (start + size).min(n);
        groups.push(start..end);
        start = end;
    }
    groups
}

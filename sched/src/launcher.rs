use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crate::{Error, Operation};

/// Terminal report from one external job.
#[derive(Debug, Clone, Copy)]
pub struct JobOutcome {
    pub success: bool,
    /// Subtraction quality verdict, present for selfcal jobs.
    pub verify_ok: Option<bool>,
}

/// The boundary to the external long-running compute jobs.
///
/// A launcher takes one operation, runs its job to a definitive exit status,
/// and reports success or failure. Implementations must be shareable across
/// the scheduler's worker threads.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, op: &Operation) -> Result<JobOutcome, Error>;
}

/// Launches the configured pipeline executable as a subprocess, with the
/// operation's parameter bundle serialized to a JSON file in the work dir
/// and stdout/stderr captured alongside it.
pub struct PipelineLauncher {
    executable: PathBuf,
}

impl PipelineLauncher {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }
}

impl JobLauncher for PipelineLauncher {
    fn launch(&self, op: &Operation) -> Result<JobOutcome, Error> {
        let label = op.label();
        let io_err = |e| Error::Launch(label.clone(), e);

        fs::create_dir_all(&op.work_dir).map_err(io_err)?;

        // hand the job its parameter bundle:
        let params_file = op.work_dir.join("parameters.json");
        let params = serde_json::json!({
            "operation": op.name,
            "direction": op.direction,
            "parameters": op.params,
        });
        fs::write(
            &params_file,
            serde_json::to_string_pretty(&params).map_err(|e| Error::Params(label.clone(), e))?,
        )
        .map_err(io_err)?;

        let out_file = File::create(op.work_dir.join("stdout.txt")).map_err(io_err)?;
        let err_file = File::create(op.work_dir.join("stderr.txt")).map_err(io_err)?;

        log::info!("launching {label} in {}", op.work_dir.display());
        let mut child = Command::new(&self.executable)
            .arg(&params_file)
            .current_dir(&op.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(io_err)?;

        let child_out = child.stdout.take().expect("child stdout not captured");
        let child_err = child.stderr.take().expect("child stderr not captured");
        let thread_out =
            thread::spawn(move || drain(child_out, out_file).expect("error draining child stdout"));
        let thread_err =
            thread::spawn(move || drain(child_err, err_file).expect("error draining child stderr"));
        thread_out.join().expect("error joining stdout thread");
        thread_err.join().expect("error joining stderr thread");

        let status = child.wait().map_err(io_err)?;
        log::debug!("{label} finished with {status}");

        let verify_ok = read_verification(op)?;
        Ok(JobOutcome {
            success: status.success(),
            verify_ok,
        })
    }
}

/// Read back the dedicated verification output, if this operation has one.
/// The job writes a bare boolean to the referenced file.
fn read_verification(op: &Operation) -> Result<Option<bool>, Error> {
    let Some(path) = op.outputs.get("verify_subtract_ok") else {
        return Ok(None);
    };
    if !path.exists() {
        // job died before the quality check ran; treated as not verified
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|e| Error::Launch(op.label(), e))?;
    match text.trim() {
        "true" | "True" => Ok(Some(true)),
        "false" | "False" => Ok(Some(false)),
        other => Err(Error::BadVerification(op.label(), other.to_owned())),
    }
}

fn drain<R: Read>(mut stream: R, mut file: File) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }
        file.write_all(&buf[..num_read])?;
    }
    Ok(())
}

/// Performs all the scheduler's bookkeeping without launching anything;
/// every job is treated as succeeded and verified. Used to validate a run
/// configuration without consuming cluster time.
pub struct DryRunLauncher;

impl JobLauncher for DryRunLauncher {
    fn launch(&self, op: &Operation) -> Result<JobOutcome, Error> {
        log::info!("dry run: not launching {}", op.label());
        Ok(JobOutcome {
            success: true,
            verify_ok: Some(true),
        })
    }
}

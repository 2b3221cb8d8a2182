use super::{json_pretty, spin_fail, spin_ok, spinner, Failure, EXIT_SUCCESS};
use console::Style;
use sofpack_core::{BuildReport, Builder};
use std::path::Path;

pub fn run(builder: &Builder, config: &Path, json: bool, progress: bool) -> Result<u8, Failure> {
    let pb = progress.then(|| spinner(&format!("packaging {}...", config.display())));

    let report = match builder.build(config) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "bundle packaged");
            }
            r
        }
        Err(e) => {
            // The spinner must be finished before anything else hits stderr.
            if let Some(ref pb) = pb {
                spin_fail(pb, if e.is_cancelled() { "interrupted" } else { "packaging failed" });
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn print_summary(report: &BuildReport) {
    let label = Style::new().dim();
    println!("{}   {}", label.apply_to("commit:"), report.commit);
    println!("{}  {}", label.apply_to("tarball:"), report.tarball.display());
    println!("{}   {}", label.apply_to("config:"), report.config_snapshot.display());
    println!("{} {}", label.apply_to("manifest:"), report.manifest.display());
    if let Some(dir) = &report.build_dir {
        println!("{} {}", label.apply_to("build dir:"), dir.display());
    }
}

use std::process::ExitCode;

use epigrid::runner::run_with_args;

fn main() -> ExitCode {
    match run_with_args() {
        Ok(Some(summary)) => {
            println!(
                "Simulated {} generations on {} processes in {} (seed {})",
                summary.generations,
                summary.process_count,
                humantime::format_duration(summary.elapsed),
                summary.base_seed
            );
            let counts = summary.final_counts;
            println!(
                "default={} incubating={} contagious={} immune={} dead={} vaccinated={}",
                counts.default,
                counts.incubating,
                counts.contagious,
                counts.immune,
                counts.dead,
                counts.vaccinated
            );
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

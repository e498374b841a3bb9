use ixa_sti::runner::run_with_args;

fn main() {
    match run_with_args(|_, _, _| Ok(())) {
        Ok(result) => {
            if !result.failures.is_empty() || !result.timed_out.is_empty() {
                eprintln!(
                    "{} trajectories failed, {} timed out",
                    result.failures.len(),
                    result.timed_out.len()
                );
                std::process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("ixa-sti: {error}");
            std::process::exit(2);
        }
    }
}

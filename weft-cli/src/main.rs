//! WEFT Command-Line Interface
//!
//! Reads a file of peephole transformations, verifies each one, and reports
//! a per-transformation verdict. The process exits non-zero when any
//! transformation is rejected.

use std::fs;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use weft_core::{
    parse, solver_print_queries, solver_print_stats, solver_tactic_verbose, Session,
    TransformPrintOpts, VerifyOpts,
};

#[derive(Parser)]
#[command(name = "weft")]
#[command(author = "PulseEngine")]
#[command(version)]
#[command(about = "WEFT - SMT-backed translation validator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a file of transformations
    Verify {
        /// Input file in the textual transformation syntax
        #[arg(value_name = "FILE")]
        input: String,

        /// Also compare every named temporary against its target twin
        #[arg(long)]
        each_var: bool,

        /// Render define-style function headers in listings
        #[arg(long)]
        headers: bool,

        /// Echo every solver query
        #[arg(long)]
        print_queries: bool,

        /// Print per-check solver timing to stderr
        #[arg(long)]
        tactic_verbose: bool,

        /// Print aggregate solver statistics after the run
        #[arg(long)]
        stats: bool,

        /// Stop at the first rejected transformation
        #[arg(long)]
        fatal: bool,
    },

    /// Show version information
    Version,
}

/// Options for a verification run.
struct VerifyCommand {
    input: String,
    each_var: bool,
    headers: bool,
    print_queries: bool,
    tactic_verbose: bool,
    stats: bool,
    fatal: bool,
}

/// Run verification over a file; returns how many transformations were
/// rejected.
fn verify_command(cmd: &VerifyCommand) -> Result<usize> {
    let _session = Session::new();
    solver_print_queries(cmd.print_queries);
    solver_tactic_verbose(cmd.tactic_verbose);

    let buf = fs::read_to_string(&cmd.input)
        .with_context(|| format!("Failed to read input file: {}", cmd.input))?;
    let mut transforms = parse(&buf)?;

    let print_opts = TransformPrintOpts {
        print_fn_header: cmd.headers,
    };
    let verify_opts = VerifyOpts {
        check_each_var: cmd.each_var,
    };

    let mut rejected = 0;
    for t in &mut transforms {
        println!("\n----------------------------------------");
        print!("{}", t.to_text(&print_opts));
        println!();

        let errs = t.verify(&verify_opts);
        if errs.is_empty() {
            println!("Transformation seems to be correct!");
        } else {
            rejected += 1;
            println!("Transformation doesn't verify!");
            print!("{}", errs);
            if cmd.fatal {
                bail!("transformation doesn't verify: {}", t.name);
            }
        }
    }

    if cmd.stats {
        println!();
        solver_print_stats(&mut std::io::stdout())?;
    }
    Ok(rejected)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Verify {
            input,
            each_var,
            headers,
            print_queries,
            tactic_verbose,
            stats,
            fatal,
        }) => {
            let rejected = verify_command(&VerifyCommand {
                input,
                each_var,
                headers,
                print_queries,
                tactic_verbose,
                stats,
                fatal,
            })?;
            if rejected > 0 {
                std::process::exit(1);
            }
        }

        Some(Commands::Version) => {
            println!("WEFT v{}", env!("CARGO_PKG_VERSION"));
            println!("SMT-backed translation validator for peephole rewrites");
        }

        None => {
            println!("WEFT - SMT-backed translation validator");
            println!();
            println!("Usage: weft <COMMAND>");
            println!();
            println!("Commands:");
            println!("  verify      Verify a file of transformations");
            println!("  version     Show version information");
            println!("  help        Print this message or the help of a subcommand");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn command_for(file: &NamedTempFile) -> VerifyCommand {
        VerifyCommand {
            input: file.path().to_string_lossy().to_string(),
            each_var: false,
            headers: false,
            print_queries: false,
            tactic_verbose: false,
            stats: false,
            fatal: false,
        }
    }

    #[test]
    fn cli_parses_a_verify_invocation() {
        let cli = Cli::parse_from(["weft", "verify", "peepholes.opt", "--each-var", "--stats"]);
        match cli.command {
            Some(Commands::Verify {
                input,
                each_var,
                stats,
                fatal,
                ..
            }) => {
                assert_eq!(input, "peepholes.opt");
                assert!(each_var);
                assert!(stats);
                assert!(!fatal);
            }
            _ => panic!("expected the verify subcommand"),
        }
    }

    #[test]
    fn verify_command_accepts_a_correct_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "Name: shift\n%x = shl i8 %a, 3\nret i8 %x\n=>\n%x = mul i8 %a, 8\nret i8 %x\n"
        )
        .unwrap();

        let rejected = verify_command(&command_for(&file)).expect("run should succeed");
        assert_eq!(rejected, 0);
    }

    #[test]
    fn verify_command_counts_rejections() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "Name: ok\nret i8 %a\n=>\nret i8 %a\n\
             Name: wrong\n%x = add i8 %a, 1\nret i8 %x\n=>\n%x = add i8 %a, 2\nret i8 %x\n"
        )
        .unwrap();

        let rejected = verify_command(&command_for(&file)).expect("run should succeed");
        assert_eq!(rejected, 1);
    }

    #[test]
    fn fatal_mode_stops_at_the_first_rejection() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "Name: wrong\n%x = add i8 %a, 1\nret i8 %x\n=>\n%x = add i8 %a, 2\nret i8 %x\n"
        )
        .unwrap();

        let mut cmd = command_for(&file);
        cmd.fatal = true;
        let err = verify_command(&cmd).unwrap_err();
        assert!(err.to_string().contains("wrong"), "{}", err);
    }

    #[test]
    fn parse_errors_surface_with_their_line() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "ret i8 %a\n=>\nret i8 %%\n").unwrap();

        let err = verify_command(&command_for(&file)).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn missing_files_are_reported_with_context() {
        let cmd = VerifyCommand {
            input: "/nonexistent/peepholes.opt".to_string(),
            each_var: false,
            headers: false,
            print_queries: false,
            tactic_verbose: false,
            stats: false,
            fatal: false,
        };
        let err = verify_command(&cmd).unwrap_err();
        assert!(err.to_string().contains("Failed to read"), "{}", err);
    }
}

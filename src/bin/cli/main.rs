//! Command-line front-end: list or extract a 7z archive.

use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use heptane::{Password, Reader, ReaderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum Mode {
    /// Print the entry table.
    #[default]
    List,
    /// Extract all entries to the output directory.
    Extract,
}

#[derive(Debug, Parser)]
#[command(name = "heptane", about = "Read 7z archives", version)]
struct Cli {
    /// Path to the archive.
    archive: PathBuf,

    /// What to do with it.
    #[arg(value_enum)]
    mode: Option<Mode>,

    /// Password for encrypted archives.
    #[arg(short, long)]
    password: Option<String>,

    /// Output directory for extraction.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Attempt recovery when the start header is damaged.
    #[arg(long)]
    recover: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("heptane: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = ReaderOptions::new()
        .use_default_name_for_unnamed_entries(true)
        .try_to_recover_broken_archives(cli.recover);
    if let Some(password) = &cli.password {
        options = options.password(Password::new(password.clone()));
    }

    let mut reader = Reader::open_path_with_options(&cli.archive, options)?;

    match cli.mode.unwrap_or_default() {
        Mode::List => list(&reader),
        Mode::Extract => extract(&mut reader, &cli.output)?,
    }
    Ok(())
}

fn list(reader: &Reader<std::fs::File>) {
    for entry in reader.entries() {
        let kind = if entry.is_directory {
            'd'
        } else if entry.is_anti {
            'a'
        } else {
            '-'
        };
        println!("{kind} {:>12} {}", entry.size, entry.name);
    }
}

fn extract(
    reader: &mut Reader<std::fs::File>,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    while let Some(index) = reader.next_entry()? {
        let entry = reader.entries()[index].clone();
        if entry.is_anti {
            continue;
        }

        let target = safe_join(output, &entry.name)?;
        if entry.is_directory {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&target)?;
        std::io::copy(&mut reader.entry_reader(), &mut file)?;
        drop(file);

        if let Some(mtime) = entry.mtime {
            let time = filetime::FileTime::from_system_time(mtime.as_system_time());
            filetime::set_file_mtime(&target, time)?;
        }
    }
    Ok(())
}

/// Joins an entry name under the output directory, rejecting absolute
/// paths and parent-directory escapes.
fn safe_join(base: &Path, name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let relative = Path::new(name);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(format!("unsafe entry path: {name}").into()),
        }
    }
    Ok(base.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escapes() {
        assert!(safe_join(Path::new("out"), "../etc/passwd").is_err());
        assert!(safe_join(Path::new("out"), "/etc/passwd").is_err());
        assert!(safe_join(Path::new("out"), "a/b/c.txt").is_ok());
    }
}

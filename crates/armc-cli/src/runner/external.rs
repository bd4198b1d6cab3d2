use armc::core::descriptors::{ArgValue, Descriptor, DescriptorArgs, DescriptorError};
use armc::core::io::traits::TrajectoryFile;
use armc::core::io::xyz::XyzFile;
use armc::core::models::trajectory::Trajectory;
use std::process::Command;

pub const NAME: &str = "external";

/// Computes a descriptor with an external program.
///
/// The trajectory is written to a temporary XYZ file whose path is appended to the `command`
/// keyword argument. The program prints the descriptor on stdout: an optional header line of
/// column labels followed by rows of `index value...`. Blank lines and `#` comments are ignored.
pub fn external(trajectory: &Trajectory, args: &DescriptorArgs) -> Result<Descriptor, DescriptorError> {
    let command = command_words(args)?;
    let (program, rest) = command.split_first().ok_or_else(|| invalid("'command' is empty"))?;

    let file = tempfile::Builder::new()
        .prefix("armc_descriptor_")
        .suffix(".xyz")
        .tempfile()
        .map_err(|e| failed(format!("cannot create temporary trajectory: {}", e)))?;
    XyzFile::write_to_path(trajectory, file.path())
        .map_err(|e| failed(format!("cannot write temporary trajectory: {}", e)))?;

    let output = Command::new(program)
        .args(rest)
        .arg(file.path())
        .output()
        .map_err(|e| failed(format!("cannot launch '{}': {}", program, e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!(
            "'{}' exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    parse_table(&String::from_utf8_lossy(&output.stdout))
}

fn command_words(args: &DescriptorArgs) -> Result<Vec<String>, DescriptorError> {
    match args.kwarg("command") {
        Some(ArgValue::Str(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Some(ArgValue::List(items)) => items
            .iter()
            .map(|item| match item {
                ArgValue::Str(s) => Ok(s.clone()),
                other => Err(invalid(&format!("'command' entry {} is not a string", other))),
            })
            .collect(),
        Some(other) => Err(invalid(&format!("'command' must be a string or list, got {}", other))),
        None => Err(invalid("missing argument 'command'")),
    }
}

fn parse_table(text: &str) -> Result<Descriptor, DescriptorError> {
    let mut header: Option<Vec<String>> = None;
    let mut index = Vec::new();
    let mut rows = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let numbers: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
        match numbers {
            Ok(numbers) => {
                index.push(numbers[0]);
                rows.push(numbers[1..].to_vec());
            }
            Err(_) if header.is_none() && rows.is_empty() => {
                header = Some(fields.iter().map(|f| f.to_string()).collect());
            }
            Err(_) => return Err(failed(format!("non-numeric output row '{}'", line))),
        }
    }

    let width = rows.first().map(Vec::len).ok_or_else(|| failed("no output rows".to_string()))?;
    let columns = match header {
        // A header may or may not label the index column.
        Some(labels) if labels.len() == width + 1 => labels[1..].to_vec(),
        Some(labels) if labels.len() == width => labels,
        Some(labels) => {
            return Err(failed(format!(
                "{} column labels for {} value columns",
                labels.len(),
                width
            )));
        }
        None => (0..width).map(|i| i.to_string()).collect(),
    };
    Descriptor::from_rows(index, columns, &rows)
}

fn invalid(reason: &str) -> DescriptorError {
    DescriptorError::InvalidArgument {
        name: NAME.to_string(),
        reason: reason.to_string(),
    }
}

fn failed(reason: String) -> DescriptorError {
    DescriptorError::Failed {
        name: NAME.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn args(command: ArgValue) -> DescriptorArgs {
        DescriptorArgs {
            args: Vec::new(),
            kwargs: BTreeMap::from([("command".to_string(), command)]),
        }
    }

    #[test]
    fn table_with_labelled_index_column() {
        let d = parse_table("# rdf\nr Cd_Cd Cd_Se\n1.0 0.0 0.5\n2.0 1.5 2.5\n").unwrap();
        assert_eq!(d.index(), &[1.0, 2.0]);
        assert_eq!(d.columns(), &["Cd_Cd".to_string(), "Cd_Se".to_string()]);
        assert_eq!(d.sum(), 4.5);
    }

    #[test]
    fn table_without_header_gets_numbered_columns() {
        let d = parse_table("0 1 2\n1 3 4\n").unwrap();
        assert_eq!(d.columns(), &["0".to_string(), "1".to_string()]);
        assert_eq!(d.shape(), (2, 2));
    }

    #[test]
    fn ragged_or_empty_tables_are_rejected() {
        assert!(parse_table("0 1 2\n1 3\n").is_err());
        assert!(parse_table("# nothing\n").is_err());
        assert!(parse_table("0 1\nbad row\n").is_err());
    }

    #[test]
    fn command_must_be_given() {
        let err = command_words(&DescriptorArgs::default()).unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidArgument { .. }));
        let words = command_words(&args(ArgValue::Str("python rdf.py --bins 10".into()))).unwrap();
        assert_eq!(words, vec!["python", "rdf.py", "--bins", "10"]);
    }

    #[cfg(unix)]
    #[test]
    fn runs_the_program_on_the_trajectory() {
        let xyz = "2\nframe\nCd 0.0 0.0 0.0\nSe 1.0 0.0 0.0\n";
        let trajectory = XyzFile::read_from(&mut xyz.as_bytes()).unwrap();
        // Reports the atom count read from the trajectory's first line.
        let script = ArgValue::List(vec![
            ArgValue::Str("sh".into()),
            ArgValue::Str("-c".into()),
            ArgValue::Str("echo \"0 $(head -n 1 \"$0\")\"".into()),
        ]);
        let d = external(&trajectory, &args(script)).unwrap();
        assert_eq!(d.index(), &[0.0]);
        assert_eq!(d.sum(), 2.0);
    }
}

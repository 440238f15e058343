use std::path::Path;

use atlas_core::CrawlError;

/// Expand seed arguments into a flat URL list. Each argument may be a single
/// URL, a comma-separated list, or a path to a file with one URL per line.
pub fn load_seeds(args: &[String]) -> Result<Vec<String>, CrawlError> {
    let mut seeds: Vec<String> = Vec::new();
    for arg in args {
        if Path::new(arg).exists() {
            let content = std::fs::read_to_string(arg)
                .map_err(|e| CrawlError::Config(format!("seeds file {arg}: {e}")))?;
            seeds.extend(
                content
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty() && !l.starts_with('#')),
            );
        } else {
            seeds.extend(
                arg.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
    }
    if seeds.is_empty() {
        return Err(CrawlError::Config("no seed URLs provided".into()));
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_and_plain() {
        let seeds = load_seeds(&[
            "https://a.example/,https://b.example/".to_string(),
            "https://c.example/".to_string(),
        ])
        .unwrap();
        assert_eq!(
            seeds,
            vec![
                "https://a.example/",
                "https://b.example/",
                "https://c.example/"
            ]
        );
    }

    #[test]
    fn file_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        std::fs::write(&path, "# seeds\nhttps://a.example/\n\nhttps://b.example/\n").unwrap();
        let seeds = load_seeds(&[path.to_string_lossy().to_string()]).unwrap();
        assert_eq!(seeds, vec!["https://a.example/", "https://b.example/"]);
    }

    #[test]
    fn empty_is_an_error() {
        assert!(load_seeds(&[]).is_err());
        assert!(load_seeds(&[" , ".to_string()]).is_err());
    }
}

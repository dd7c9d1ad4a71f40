//! Catalog statistics.
//!
//! A quick summary of how far each stage has progressed: how many URLs are
//! resolved and live, how many objects carry each kind of metadata, and how
//! many objects each classifier has labelled. Used by `ocaz stats`.

use anyhow::Result;
use std::path::Path;

use crate::models::StoreStats;
use crate::store::IdentityStore;

/// Query the store and print a summary. `db_path` adds the file size line.
pub async fn run_stats(store: &dyn IdentityStore, db_path: Option<&Path>) -> Result<()> {
    let stats = store.stats().await?;
    print!("{}", render(&stats, db_path));
    Ok(())
}

fn render(stats: &StoreStats, db_path: Option<&Path>) -> String {
    let mut out = String::new();
    out.push_str("ocaz catalog\n");
    out.push_str("============\n\n");

    if let Some(path) = db_path {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        out.push_str(&format!("  Database:     {}\n", path.display()));
        out.push_str(&format!("  Size:         {}\n\n", format_bytes(size)));
    }

    out.push_str(&format!("  URLs:         {}\n", stats.urls));
    out.push_str(&format!(
        "    resolved:   {} ({})\n",
        stats.urls_resolved,
        percent(stats.urls_resolved, stats.urls)
    ));
    out.push_str(&format!("    available:  {}\n", stats.urls_available));
    out.push_str(&format!("    unavailable: {}\n", stats.urls_unavailable));
    out.push('\n');
    out.push_str(&format!("  Objects:      {}\n", stats.objects));
    out.push_str(&format!(
        "    sha1:       {} ({})\n",
        stats.objects_sha1,
        percent(stats.objects_sha1, stats.objects)
    ));
    out.push_str(&format!("    image:      {}\n", stats.objects_image));
    out.push_str(&format!(
        "    phash:      {} / {}\n",
        stats.objects_perceptual_hash, stats.objects_image
    ));
    out.push_str(&format!("    video:      {}\n", stats.objects_video));

    if !stats.predictions.is_empty() {
        out.push('\n');
        out.push_str("  By classifier:\n");
        out.push_str(&format!("  {:<32} {:>10}\n", "SERVICE", "OBJECTS"));
        out.push_str(&format!("  {}\n", "-".repeat(43)));
        for (service, count) in &stats.predictions {
            out.push_str(&format!("  {:<32} {:>10}\n", service, count));
        }
    }
    out.push('\n');
    out
}

fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        "0%".to_string()
    } else {
        format!("{}%", part * 100 / whole)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counts_and_classifiers() {
        let mut stats = StoreStats {
            urls: 4,
            urls_resolved: 3,
            urls_available: 2,
            urls_unavailable: 1,
            objects: 2,
            objects_sha1: 1,
            objects_image: 1,
            objects_perceptual_hash: 1,
            objects_video: 1,
            ..Default::default()
        };
        stats.predictions.insert("nsfw-opennsfw2".to_string(), 1);

        let text = render(&stats, None);
        assert!(text.contains("URLs:         4"));
        assert!(text.contains("resolved:   3 (75%)"));
        assert!(text.contains("sha1:       1 (50%)"));
        assert!(text.contains("nsfw-opennsfw2"));
        assert!(!text.contains("Database:"));
    }

    #[test]
    fn empty_catalog_has_no_classifier_table() {
        let text = render(&StoreStats::default(), None);
        assert!(text.contains("resolved:   0 (0%)"));
        assert!(!text.contains("By classifier"));
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}

//! Drive and partition listing.
//!
//! Pure formatting over inspector records; all presentation choices are
//! carried in an explicit [`ListOptions`] value.

use anyhow::Result;
use bootprep_blockdev as blockdev;
use bootprep_blockdev::{partition_types as pt, Device, ListFilter};

use crate::cli::ListOpts;

/// Resolved listing options.
#[derive(Debug, Clone, Default)]
struct ListOptions {
    filter: ListFilter,
    drives: bool,
    full: bool,
    simplify: bool,
    tabs: bool,
    header: bool,
    prefix: bool,
    /// Leaf names to restrict output to; empty means everything.
    selection: Vec<String>,
}

impl ListOptions {
    fn from_cli(opts: &ListOpts) -> Self {
        ListOptions {
            filter: ListFilter {
                min_size_mib: opts.min_size,
                exclude_uuid: opts.exclude_uuid.clone(),
                swap_only: opts.swap_only,
                no_swap: opts.no_swap,
                no_efi: opts.no_efi,
                no_removable: opts.no_removable,
            },
            drives: opts.drives,
            full: opts.full,
            simplify: opts.simplify,
            tabs: opts.tabs,
            header: opts.header,
            prefix: opts.prefix,
            selection: opts
                .devices
                .iter()
                .map(|d| blockdev::leaf_name(d).to_string())
                .collect(),
        }
    }
}

pub(crate) fn run(opts: ListOpts) -> Result<()> {
    let devices = blockdev::list(opts.major)?;
    print!("{}", render(&devices, &ListOptions::from_cli(&opts)));
    Ok(())
}

fn render(devices: &[Device], opts: &ListOptions) -> String {
    let (header, rows) = if opts.drives {
        (drive_header(opts), drive_rows(devices, opts))
    } else {
        (partition_header(), partition_rows(devices, opts))
    };
    let header = opts.header.then_some(header);
    render_table(header, rows, opts.tabs)
}

fn partition_header() -> Vec<String> {
    ["NAME", "SIZE", "FSTYPE", "LABEL"]
        .map(String::from)
        .to_vec()
}

fn drive_header(opts: &ListOptions) -> Vec<String> {
    if opts.full {
        ["NAME", "SIZE", "ROTA", "RM", "PARTS", "MODEL", "LABELS"]
            .map(String::from)
            .to_vec()
    } else {
        ["NAME", "SIZE", "MODEL"].map(String::from).to_vec()
    }
}

fn partition_rows(devices: &[Device], opts: &ListOptions) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for drive in devices {
        let drive_selected = opts.selection.contains(&drive.name);
        for part in drive.partitions() {
            let selected = opts.selection.is_empty()
                || drive_selected
                || opts.selection.contains(&part.name);
            if !selected || !opts.filter.admits(part) {
                continue;
            }
            rows.push(vec![
                display_name(&part.name, opts),
                format_size(part.size_sectors()),
                fs_display(part.fstype(), opts).to_string(),
                part.label().to_string(),
            ]);
        }
    }
    rows
}

fn drive_rows(devices: &[Device], opts: &ListOptions) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for drive in devices {
        let selected = opts.selection.is_empty() || opts.selection.contains(&drive.name);
        if !selected || !opts.filter.admits_drive(drive) {
            continue;
        }
        let model = drive.model.as_deref().unwrap_or("").to_string();
        let row = if opts.full {
            vec![
                display_name(&drive.name, opts),
                format_size(drive.size_sectors()),
                drive.rotational.to_string(),
                drive.removable.to_string(),
                partition_count(drive).to_string(),
                model,
                quoted_labels(drive),
            ]
        } else {
            vec![
                display_name(&drive.name, opts),
                format_size(drive.size_sectors()),
                model,
            ]
        };
        rows.push(row);
    }
    rows
}

/// Partitions on the drive whose type identifier is not a boot-record
/// container code.
fn partition_count(drive: &Device) -> usize {
    drive
        .partitions()
        .filter(|p| !pt::BOOT_RECORD_IDS.contains(&p.parttype().as_str()))
        .count()
}

/// Every non-empty label on the drive, individually quoted.
fn quoted_labels(drive: &Device) -> String {
    drive
        .partitions()
        .map(|p| p.label())
        .filter(|l| !l.is_empty())
        .map(|l| format!("\"{l}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_name(name: &str, opts: &ListOptions) -> String {
    if opts.prefix {
        format!("/dev/{name}")
    } else {
        name.to_string()
    }
}

// The rename table applies to both rendering and width computation,
// since renamed values flow into the rows before widths are taken.
fn fs_display<'a>(fstype: &'a str, opts: &ListOptions) -> &'a str {
    if !opts.simplify {
        return fstype;
    }
    match fstype {
        "ntfs-3g" => "NTFS",
        "vfat" => "Fat32",
        "hfsplus" => "HPFS",
        other => other,
    }
}

fn format_size(sectors: u64) -> String {
    const GIB: u64 = 1 << 30;
    const MIB: u64 = 1 << 20;
    let bytes = sectors * 512;
    if bytes >= GIB {
        format!("{:.1}G", bytes as f64 / GIB as f64)
    } else {
        format!("{}M", bytes / MIB)
    }
}

/// Render rows either tab-delimited (machine-consumable) or space-aligned
/// with per-column widths computed over every emitted row. An empty row
/// set renders as nothing, header included.
fn render_table(header: Option<Vec<String>>, rows: Vec<Vec<String>>, tabs: bool) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut all = Vec::new();
    all.extend(header);
    all.extend(rows);
    if tabs {
        let mut out = String::new();
        for row in &all {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        return out;
    }
    let columns = all.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in &all {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let mut out = String::new();
    for row in &all {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            if i + 1 == row.len() {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{cell:<width$}  ", width = widths[i]));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

//! Parent chain resolution for differencing images
//!
//! A differencing image names its parent through up to eight locator
//! records. Each record is decoded into a path relative to the child's
//! directory; the first path naming an existing file is opened as the
//! parent, recursively, until a non-differencing image ends the chain.

use super::read_exact_at;
use super::types::{ParentLocatorEntry, PlatformCode, VhdDynamicHeader, VhdFooter};
use super::VhdImage;
use crate::VaultConfig;
use keepsake_core::{Error, ReadSeek, Result, SectorReader, MAX_LOCATOR_BYTES, SECTOR_SIZE};
use std::fs::File;
use std::io::SeekFrom;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Images already on the chain being opened
#[derive(Debug)]
pub struct ChainContext {
    visited: Vec<PathBuf>,
    unnamed: usize,
    max_depth: usize,
}

impl ChainContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            visited: Vec::new(),
            unnamed: 0,
            max_depth,
        }
    }

    /// Number of images opened so far
    pub fn depth(&self) -> usize {
        self.visited.len() + self.unnamed
    }

    /// Record an image opened from a stream rather than a file
    ///
    /// It counts toward the depth limit but cannot take part in a cycle.
    pub fn enter_unnamed(&mut self) -> Result<()> {
        self.check_depth()?;
        self.unnamed += 1;
        Ok(())
    }

    fn check_depth(&self) -> Result<()> {
        if self.depth() > self.max_depth {
            return Err(Error::unsupported(format!(
                "Parent chain deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    /// Record `path` as the next image of the chain
    ///
    /// The first image is the one the caller asked for; every further one
    /// is a parent and counts against the depth limit.
    pub fn enter(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize()?;
        if self.visited.contains(&canonical) {
            return Err(Error::corrupt(format!(
                "Parent chain loops back to {}",
                canonical.display()
            )));
        }
        self.check_depth()?;
        self.visited.push(canonical);
        Ok(())
    }
}

/// Decode a locator payload into a path
///
/// Returns `None` for unused slots, Mac aliases, unknown platform codes and
/// payloads that do not decode.
pub fn decode_locator(code: PlatformCode, payload: &[u8]) -> Option<PathBuf> {
    let text = match code {
        PlatformCode::WindowsRelative | PlatformCode::WindowsAbsolute => {
            let text = std::str::from_utf8(payload).ok()?;
            if !text.is_ascii() {
                return None;
            }
            text.to_string()
        }
        PlatformCode::WindowsRelativeUnicode | PlatformCode::WindowsAbsoluteUnicode => {
            encoding_rs::UTF_16BE
                .decode_without_bom_handling_and_without_replacement(payload)?
                .into_owned()
        }
        PlatformCode::MacUri => {
            let text = std::str::from_utf8(payload).ok()?.trim_end_matches('\0');
            let url = url::Url::parse(text).ok()?;
            if url.scheme() != "file" {
                return None;
            }
            return url.to_file_path().ok();
        }
        PlatformCode::None | PlatformCode::MacAlias | PlatformCode::Unknown(_) => return None,
    };

    let text = text.trim_end_matches('\0');
    if text.is_empty() {
        return None;
    }
    Some(PathBuf::from(text.replace('\\', &MAIN_SEPARATOR.to_string())))
}

fn read_payload(
    stream: &mut dyn ReadSeek,
    locator: &ParentLocatorEntry,
) -> Result<Option<Vec<u8>>> {
    let length = locator.data_length;
    // Older writers record the data space in sectors, newer ones in bytes.
    let space = if locator.data_space != 0 && locator.data_space < SECTOR_SIZE {
        locator.data_space.saturating_mul(SECTOR_SIZE)
    } else {
        locator.data_space
    };

    if length == 0 || length > MAX_LOCATOR_BYTES || (space != 0 && length > space) {
        tracing::debug!(
            length,
            data_space = locator.data_space,
            "Skipping locator with unusable payload length"
        );
        return Ok(None);
    }

    let stream_len = stream.seek(SeekFrom::End(0))?;
    let in_bounds = locator
        .data_offset
        .checked_add(length as u64)
        .is_some_and(|end| end <= stream_len);
    if !in_bounds {
        tracing::debug!(
            offset = locator.data_offset,
            length,
            stream_len,
            "Skipping locator whose payload lies past the end of the image"
        );
        return Ok(None);
    }

    let mut payload = vec![0u8; length as usize];
    if let Err(err) = read_exact_at(stream, locator.data_offset, &mut payload) {
        tracing::debug!(offset = locator.data_offset, error = %err, "Locator payload unreadable");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Candidate parent paths in the order they are tried
pub fn candidate_paths(
    stream: &mut dyn ReadSeek,
    header: &VhdDynamicHeader,
    base_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    let mut push = |path: PathBuf| {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    };

    for (slot, locator) in header.parent_locators.iter().enumerate() {
        if !locator.is_populated() {
            continue;
        }
        let Some(payload) = read_payload(stream, locator)? else {
            continue;
        };
        let Some(path) = decode_locator(locator.platform_code, &payload) else {
            tracing::debug!(slot, code = ?locator.platform_code, "Locator not decodable");
            continue;
        };
        tracing::debug!(
            slot,
            code = ?locator.platform_code,
            path = %path.display(),
            "Parent locator"
        );

        let joined = base_dir.join(&path);
        let file_name = joined.file_name().map(|name| base_dir.join(name));
        push(joined);
        if let Some(sibling) = file_name {
            push(sibling);
        }
    }

    if let Some(name) = header.parent_name() {
        let name = name.replace('\\', &MAIN_SEPARATOR.to_string());
        if let Some(file_name) = Path::new(&name).file_name() {
            push(base_dir.join(file_name));
        }
    }

    Ok(candidates)
}

fn openable(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

/// Locate, open and validate the parent of a differencing image
pub fn resolve_parent(
    stream: &mut dyn ReadSeek,
    header: &VhdDynamicHeader,
    child_footer: &VhdFooter,
    base_dir: &Path,
    config: &VaultConfig,
    ctx: &mut ChainContext,
) -> Result<VhdImage> {
    let candidates = candidate_paths(stream, header, base_dir)?;
    let Some(path) = candidates.iter().find(|path| openable(path)) else {
        return Err(Error::parent_not_found(match (candidates.first(), header.parent_name()) {
            (Some(first), _) => format!(
                "none of {} candidate paths exist (first: {})",
                candidates.len(),
                first.display()
            ),
            (None, Some(name)) => name,
            (None, None) => "image carries no usable parent locator".to_string(),
        }));
    };

    let parent = VhdImage::open_in_chain(path, config, ctx)?;

    let expected = child_footer.sector_count();
    let actual = parent.sector_count();
    if expected != actual {
        return Err(Error::ParentMismatch { expected, actual });
    }

    let recorded = header.parent_unique_id();
    let found = parent.footer().unique_id();
    if recorded != found {
        tracing::warn!(
            parent = %path.display(),
            %recorded,
            %found,
            "Parent unique id differs from the one recorded by the child"
        );
    }

    Ok(parent)
}

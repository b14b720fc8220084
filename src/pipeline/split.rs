//! Input validation and splitting a drawing set into single-page PDFs.
//!
//! Each page is written as `page_<N>.pdf`, N being the 1-indexed page number
//! in the original document. Skipping the cover sheet therefore starts at
//! `page_2.pdf`, and the page numbers in the combined output always refer to
//! the original document.

use crate::error::TakeoffError;
use crate::output::PageTask;
use crate::pipeline::render::bind_pdfium;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Splits a PDF into single-page files.
pub trait PdfSplitter: Send + Sync {
    /// Write one file per page into `output_dir`, in page order.
    fn split(
        &self,
        input_pdf: &Path,
        output_dir: &Path,
        skip_first_page: bool,
    ) -> Result<Vec<PageTask>, TakeoffError>;
}

/// [`PdfSplitter`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumSplitter;

impl PdfSplitter for PdfiumSplitter {
    fn split(
        &self,
        input_pdf: &Path,
        output_dir: &Path,
        skip_first_page: bool,
    ) -> Result<Vec<PageTask>, TakeoffError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(input_pdf, None)
            .map_err(|e| load_error(input_pdf, e))?;

        let total_pages = document.pages().len() as usize;
        let start = usize::from(skip_first_page);
        info!("PDF loaded: {} pages", total_pages);

        let mut tasks = Vec::with_capacity(total_pages.saturating_sub(start));
        for idx in start..total_pages {
            let page_number = idx + 1;
            let split_err = |e: PdfiumError| TakeoffError::SplitFailed {
                path: input_pdf.to_path_buf(),
                page: page_number,
                detail: format!("{e:?}"),
            };

            let mut single = pdfium.create_new_pdf().map_err(split_err)?;
            single
                .pages_mut()
                .copy_page_from_document(&document, idx as PdfPageIndex, 0)
                .map_err(split_err)?;

            let path = output_dir.join(page_file_name(page_number as u32));
            single.save_to_file(&path).map_err(split_err)?;
            debug!("Wrote {}", path.display());

            tasks.push(PageTask::new(page_number as u32, path));
        }

        if tasks.is_empty() {
            return Err(TakeoffError::NoPages {
                path: input_pdf.to_path_buf(),
                total: total_pages,
                skipped_first: skip_first_page,
            });
        }
        Ok(tasks)
    }
}

fn load_error(path: &Path, e: PdfiumError) -> TakeoffError {
    let detail = format!("{e:?}");
    if detail.contains("Password") || detail.contains("password") {
        TakeoffError::PasswordRequired {
            path: path.to_path_buf(),
        }
    } else {
        TakeoffError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

/// `page_<N>.pdf`
pub fn page_file_name(page_number: u32) -> String {
    format!("page_{page_number}.pdf")
}

/// Page number encoded in a `page_<N>.pdf` file name.
pub fn page_number_from_path(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("pdf") {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("page_")?
        .parse()
        .ok()
}

/// Collect `page_<N>.pdf` files from a previous split, ordered by page.
pub fn discover_split_pages(dir: &Path) -> Result<Vec<PageTask>, TakeoffError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TakeoffError::FileNotFound {
            path: dir.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => TakeoffError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => TakeoffError::Internal(format!("reading '{}': {e}", dir.display())),
    })?;

    let mut tasks: Vec<PageTask> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter_map(|path| page_number_from_path(&path).map(|n| PageTask::new(n, path)))
        .collect();
    tasks.sort_by_key(|t| t.page_number);

    if tasks.is_empty() {
        return Err(TakeoffError::NoPages {
            path: dir.to_path_buf(),
            total: 0,
            skipped_first: false,
        });
    }
    Ok(tasks)
}

/// Check the input exists, is readable and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<PathBuf, TakeoffError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(TakeoffError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(TakeoffError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TakeoffError::PermissionDenied { path });
        }
        Err(_) => return Err(TakeoffError::FileNotFound { path }),
    }

    debug!("Validated input PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_page_numbers() {
        assert_eq!(page_number_from_path(Path::new("out/page_1.pdf")), Some(1));
        assert_eq!(page_number_from_path(Path::new("page_12.PDF")), Some(12));
        assert_eq!(page_number_from_path(Path::new("page_x.pdf")), None);
        assert_eq!(page_number_from_path(Path::new("page_3.png")), None);
        assert_eq!(page_number_from_path(Path::new("sheet_3.pdf")), None);
        assert_eq!(page_number_from_path(Path::new("page_3")), None);
    }

    #[test]
    fn file_name_round_trips() {
        let name = page_file_name(7);
        assert_eq!(name, "page_7.pdf");
        assert_eq!(page_number_from_path(Path::new(&name)), Some(7));
    }

    #[test]
    fn discovers_pages_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page_10.pdf", "page_2.pdf", "page_3.pdf", "notes.txt", "page_3.png"] {
            fs::write(dir.path().join(name), b"%PDF").unwrap();
        }
        let tasks = discover_split_pages(dir.path()).unwrap();
        let numbers: Vec<u32> = tasks.iter().map(|t| t.page_number).collect();
        assert_eq!(numbers, vec![2, 3, 10]);
        assert_eq!(tasks[0].source_path, dir.path().join("page_2.pdf"));
    }

    #[test]
    fn empty_split_dir_is_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_split_pages(dir.path()).unwrap_err();
        assert!(matches!(err, TakeoffError::NoPages { .. }), "got {err:?}");
    }

    #[test]
    fn missing_split_dir_is_not_found() {
        let err = discover_split_pages(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, TakeoffError::FileNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn validate_rejects_missing_and_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf");
        assert!(matches!(
            validate_pdf(&missing),
            Err(TakeoffError::FileNotFound { .. })
        ));

        let png = dir.path().join("drawing.pdf");
        fs::write(&png, b"\x89PNG....").unwrap();
        match validate_pdf(&png) {
            Err(TakeoffError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"\x89PNG"),
            other => panic!("unexpected: {other:?}"),
        }

        let pdf = dir.path().join("set.pdf");
        fs::write(&pdf, b"%PDF-1.7\n").unwrap();
        assert_eq!(validate_pdf(&pdf).unwrap(), pdf);
    }
}

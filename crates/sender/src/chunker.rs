//! Splits a file into the byte-range jobs an upload is made of.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// One piece of an upload: an inclusive byte range of the source file.
///
/// A zero-byte file produces a single job with `num_parts == 0`; its range
/// is empty and never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadJob {
    pub part_num: u32,
    pub num_parts: u32,
    pub start: u64,
    pub end: u64,
}

/// Plans the jobs for a file of `file_size` bytes cut into `chunk_size`
/// pieces. The last piece may be shorter.
pub fn plan_jobs(file_size: u64, chunk_size: u64) -> Vec<UploadJob> {
    if file_size == 0 {
        return vec![UploadJob {
            part_num: 0,
            num_parts: 0,
            start: 0,
            end: 0,
        }];
    }

    let num_parts = file_size.div_ceil(chunk_size) as u32;
    (0..num_parts)
        .map(|part_num| {
            let start = part_num as u64 * chunk_size;
            let end = (start + chunk_size).min(file_size) - 1;
            UploadJob {
                part_num,
                num_parts,
                start,
                end,
            }
        })
        .collect()
}

/// Reads the job's byte range from the file at `path`.
pub async fn read_job_bytes(path: &Path, job: &UploadJob) -> std::io::Result<Vec<u8>> {
    if job.num_parts == 0 {
        return Ok(Vec::new());
    }
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(job.start)).await?;
    let len = job.end - job.start + 1;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

use flate2::read::MultiGzDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// True when the file starts with the gzip magic bytes.
fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < magic.len() {
        let read = file.read(&mut magic[filled..])?;
        if read == 0 {
            return Ok(false);
        }
        filled += read;
    }
    Ok(magic == [0x1f, 0x8b])
}

/// Opens a plain or gzip/bgzip-compressed genotype file as one buffered byte
/// stream. Concatenated gzip members (bgzip blocks) are decoded in sequence.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let with_path =
        |e: io::Error| io::Error::new(e.kind(), format!("Opening {}: {e}", path.display()));

    let gzip = is_gzip(path).map_err(with_path)?;
    let file = File::open(path).map_err(with_path)?;
    if gzip {
        debug!("Reading {} through a gzip decoder", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

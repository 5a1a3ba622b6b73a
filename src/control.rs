use std::fs::{self, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::debug;

/// Name of the memory-mapped region the server processes poll for commands.
pub const SHARED_MEMORY_FILE: &str = "sharedmemory";
/// Marker left next to the region when a stop was requested from outside.
pub const STOP_MARKER_FILE: &str = "orchestrator.stop";

/// Ten bytes per process slot, fifty slots.
const REGION_LENGTH: usize = 50 * 10;
/// Stop byte of slot 0, the application (main) process.
const APPLICATION_STOP_OFFSET: usize = 1;
const STOP_REQUESTED: u8 = 0xFF;

/// Out-of-band stop channel of one installation.
///
/// The server's processes watch a shared memory file in their temp
/// directory; setting the stop byte of the application slot makes the whole
/// server shut down on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopChannel {
    temp_dir: PathBuf,
}

impl StopChannel {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn shared_memory_file(&self) -> PathBuf {
        self.temp_dir.join(SHARED_MEMORY_FILE)
    }

    pub fn marker_file(&self) -> PathBuf {
        self.temp_dir.join(STOP_MARKER_FILE)
    }

    /// Asks the server to stop: writes the marker file, then sets the stop
    /// byte of the application slot.
    pub fn request_stop(&self) -> io::Result<()> {
        fs::create_dir_all(&self.temp_dir)?;
        fs::write(
            self.marker_file(),
            format!("stop requested at {}\n", chrono::Utc::now().to_rfc3339()),
        )?;
        write_stop_byte(&self.shared_memory_file())?;
        debug!("Stop requested through {:?}", self.shared_memory_file());
        Ok(())
    }

    /// True once a stop was requested through this channel.
    pub fn is_stop_requested(&self) -> io::Result<bool> {
        let bytes = match fs::read(self.shared_memory_file()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(bytes.get(APPLICATION_STOP_OFFSET) == Some(&STOP_REQUESTED))
    }
}

fn write_stop_byte(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if file.metadata()?.len() < REGION_LENGTH as u64 {
        file.set_len(REGION_LENGTH as u64)?;
    }
    let length = NonZeroUsize::new(REGION_LENGTH)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty region"))?;

    // SAFETY: the mapping covers exactly REGION_LENGTH bytes of a file that
    // is at least that long, the offset is within bounds and the mapping is
    // dropped before returning.
    unsafe {
        let region = mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            &file,
            0,
        )?;
        region
            .cast::<u8>()
            .as_ptr()
            .add(APPLICATION_STOP_OFFSET)
            .write_volatile(STOP_REQUESTED);
        munmap(region, REGION_LENGTH)?;
    }
    Ok(())
}

//! Host tool for yboot boot records.
//!
//! `build` runs the real loader state machine against a synthetic machine
//! and writes the sealed record, so kernels can be tested with exact inputs.
//! `dump` validates a record image and shows what a kernel would see.
//! `locate` finds the template a kernel embedded in its image.

mod parse;
mod report;

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::{eyre, WrapErr};
use x86_64::PhysAddr;
use yboot::{BootRecord, Initrd, MemoryMap};
use yboot_loader::video::modes;
use yboot_loader::{
    KernelImage, Loader, LoaderConfig, ModeInfo, Resources, VideoBackend, VideoDefaults,
    VideoError,
};

use parse::{InitrdSpec, MmapSpec, ModeSpec};
use report::Report;

#[derive(Parser, Debug)]
#[command(about = "Build, dump and locate yboot boot records")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the loader on a synthetic machine and write the sealed record.
    Build(BuildArgs),
    /// Validate a raw record image and print what the kernel would see.
    Dump {
        record: PathBuf,
    },
    /// Find the record template embedded in a kernel ELF.
    Locate {
        kernel: PathBuf,
        /// Physical address the raw image would be kept at; prints the
        /// symbol table pointers the loader would hand over.
        #[arg(long, value_parser = parse::hex)]
        file_phys: Option<u64>,
    },
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    #[arg(short, long)]
    output: PathBuf,
    /// Kernel video request, e.g. 800x600:bgr32.
    #[arg(long)]
    request: Option<ModeSpec>,
    /// Raw pixel format for the request, to test malformed requests.
    #[arg(long, requires = "request")]
    raw_format: Option<u32>,
    /// Start from the template embedded in this kernel image.
    #[arg(long, conflicts_with = "request")]
    kernel: Option<PathBuf>,
    /// A mode the synthetic display offers. Without any, the machine has no
    /// graphics output.
    #[arg(long = "mode")]
    modes: Vec<ModeSpec>,
    #[arg(long, value_parser = parse::hex, default_value = "0xfd000000")]
    framebuffer: u64,
    /// Don't fall back to the default mode.
    #[arg(long)]
    no_fallback: bool,
    /// Memory map as ADDR:COUNT:STRIDE.
    #[arg(long)]
    mmap: Option<MmapSpec>,
    /// Initrd as ADDR:SIZE.
    #[arg(long)]
    initrd: Option<InitrdSpec>,
    #[arg(long, value_parser = parse::hex)]
    rsdp: Option<u64>,
    #[arg(long, default_value = "")]
    cmdline: String,
}

/// A display offering a fixed list of modes, all sharing one framebuffer.
struct SyntheticDisplay {
    modes: Vec<ModeSpec>,
    framebuffer: u64,
}

impl VideoBackend for SyntheticDisplay {
    fn mode_count(&self) -> u32 {
        self.modes.len() as u32
    }

    fn mode(&self, index: u32) -> Option<ModeInfo> {
        self.modes.get(index as usize).map(|m| ModeInfo {
            index,
            width: m.width,
            height: m.height,
            format: Some(m.format),
            pixels_per_scanline: m.width,
        })
    }

    fn set_mode(&mut self, index: u32) -> Result<u64, VideoError> {
        if index as usize >= self.modes.len() {
            return Err(VideoError::NoSuchMode(index));
        }
        Ok(self.framebuffer)
    }
}

fn phys(what: &str, addr: u64) -> eyre::Result<PhysAddr> {
    PhysAddr::try_new(addr).map_err(|_| eyre!("{what} address {addr:#x} is not a physical address"))
}

fn read_kernel(path: &Path) -> eyre::Result<Vec<u8>> {
    fs::read(path).wrap_err_with(|| format!("reading kernel {}", path.display()))
}

fn template(args: &BuildArgs) -> eyre::Result<BootRecord> {
    if let Some(path) = &args.kernel {
        let bytes = read_kernel(path)?;
        let image = KernelImage::parse(&bytes)?;
        let location = image.locate_record()?;
        return image
            .record_template(&location)
            .ok_or_else(|| eyre!("record at offset {:#x} runs past the file", location.offset));
    }

    let mut record = BootRecord::kernel_template();
    if let Some(request) = args.request {
        let format = args.raw_format.unwrap_or(request.format.as_raw());
        record.request_video_mode_raw(request.width, request.height, format);
    }
    Ok(record)
}

fn build(args: BuildArgs) -> eyre::Result<()> {
    let mut record = template(&args)?;

    let config = LoaderConfig {
        video: VideoDefaults {
            fallback: !args.no_fallback,
            ..VideoDefaults::default()
        },
        ..LoaderConfig::default()
    };

    let mut display = SyntheticDisplay {
        modes: args.modes.clone(),
        framebuffer: args.framebuffer,
    };
    let backend: Option<&mut dyn VideoBackend> = if display.modes.is_empty() {
        None
    } else {
        Some(&mut display)
    };

    let resources = Resources {
        memory_map: args
            .mmap
            .map(|m| {
                Ok::<_, eyre::Report>(MemoryMap {
                    addr: phys("memory map", m.addr)?,
                    count: m.count,
                    entry_size: m.stride,
                })
            })
            .transpose()?,
        elf: None,
        initrd: args
            .initrd
            .map(|i| {
                Ok::<_, eyre::Report>(Initrd {
                    base: phys("initrd", i.addr)?,
                    size: i.size,
                })
            })
            .transpose()?,
        rsdp: args.rsdp.map(|a| phys("rsdp", a)).transpose()?,
        cmdline: &args.cmdline,
    };

    let loader = Loader::new(&mut record).open()?;
    log::info!("kernel requested {:?}", loader.request());
    let sealed = loader
        .grant_video(backend, &config)
        .seal(&resources, &config)?;

    fs::write(&args.output, sealed.record().as_bytes())
        .wrap_err_with(|| format!("writing {}", args.output.display()))?;
    println!("wrote {} byte record to {}", BootRecord::SIZE, args.output.display());
    Ok(())
}

fn dump(path: &Path) -> eyre::Result<()> {
    let bytes = fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let bytes: &[u8; BootRecord::SIZE] = bytes.as_slice().try_into().map_err(|_| {
        eyre!(
            "{} is {} bytes; a record is {}",
            path.display(),
            bytes.len(),
            BootRecord::SIZE
        )
    })?;
    let record = BootRecord::from_bytes(bytes);

    match record.consume() {
        Ok(info) => {
            print!("{}", Report(&info));
            Ok(())
        }
        Err(mismatch) => {
            let blame = report::mismatch(&mismatch);
            Err(mismatch).wrap_err(blame)
        }
    }
}

fn locate(path: &Path, file_phys: Option<u64>) -> eyre::Result<()> {
    let bytes = read_kernel(path)?;
    let image = KernelImage::parse(&bytes)?;

    let location = image.locate_record()?;
    println!(
        "record:  vaddr {:#x}, paddr {:#x}, file offset {:#x}",
        location.vaddr, location.paddr, location.offset
    );
    println!("entry:   {:#x}", image.entry_point());

    let extent = image.extent()?;
    println!(
        "loads:   {:#x}..{:#x}",
        extent.address().as_raw(),
        extent.end_address().as_raw()
    );

    if let Some(template) = image.record_template(&location) {
        let request = template.video_request();
        if request.is_unspecified() {
            println!("video:   no request");
        } else {
            println!(
                "video:   requests {}x{} format {}",
                request.width, request.height, request.raw_format
            );
        }
    }

    if let Some(file_phys) = file_phys {
        match image.elf_tables(file_phys)? {
            Some(tables) => println!(
                "symtab:  header {:#x}, data {:#x}\nstrtab:  header {:#x}, data {:#x}",
                tables.symtab_hdr.as_u64(),
                tables.symtab_data.as_u64(),
                tables.strtab_hdr.as_u64(),
                tables.strtab_data.as_u64()
            ),
            None => println!("symtab:  stripped"),
        }
    }

    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Command::Build(args) => build(args),
        Command::Dump { record } => dump(&record),
        Command::Locate { kernel, file_phys } => locate(&kernel, file_phys),
    }
}

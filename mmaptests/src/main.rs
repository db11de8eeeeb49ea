//! Boot a simulated machine and run the mmap test suite in a user
//! process, the way the suite runs inside the kernel.
#[macro_use]
extern crate log;

mod logging;
mod ramfs;
mod suite;
mod user;

use clap::{App, Arg};
use ramfs::RamFs;
use user::User;
use vmos::config::DEFAULT_MEMORY_FRAMES;
use vmos::{Kernel, KernelConfig};

fn main() {
    let matches = App::new("mmaptests")
        .about("Run the mmap/munmap/msync/shm test suite on a simulated VM core")
        .arg(
            Arg::with_name("frames")
                .short("f")
                .long("frames")
                .takes_value(true)
                .help("Frames of simulated physical memory"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log kernel activity at debug level or above"),
        )
        .get_matches();
    logging::init(matches.is_present("verbose"));
    let frames = match matches.value_of("frames") {
        Some(value) => match value.parse::<usize>() {
            Ok(frames) => frames,
            Err(_) => {
                eprintln!("invalid --frames: {}", value);
                std::process::exit(2);
            }
        },
        None => DEFAULT_MEMORY_FRAMES,
    };
    if let Err(code) = run(frames) {
        std::process::exit(code);
    }
}

fn run(frames: usize) -> Result<(), i32> {
    let kernel = Kernel::boot(KernelConfig {
        frames,
        ..KernelConfig::default()
    })
    .map_err(|err| {
        eprintln!("boot failed: {}", err);
        2
    })?;
    let fs = RamFs::new();
    let init = User::spawn(&kernel).map_err(|err| {
        eprintln!("cannot create the test process: {}", err);
        2
    })?;
    info!("mmaptests running as process {}", init.pid());
    let result = suite::run_all(&init, &fs);
    init.exit(0);
    match result {
        Ok(()) => Ok(()),
        Err(failure) => {
            eprintln!("{}", failure);
            Err(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::BTreeSet;
    use vmos::config::{KERNBASE, PAGE_SIZE};
    use vmos::mm::VirtAddr;
    use vmos::syscall::{MAP_ANONYMOUS, MAP_FAILED, PROT_READ, PROT_WRITE};

    fn boot(frames: usize) -> std::sync::Arc<Kernel> {
        logging::init(false);
        Kernel::boot(KernelConfig {
            frames,
            ..KernelConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn suite_passes() {
        let kernel = boot(DEFAULT_MEMORY_FRAMES);
        let fs = RamFs::new();
        {
            let init = User::spawn(&kernel).unwrap();
            suite::run_all(&init, &fs).unwrap();
            assert!(init.is_alive());
        }
        assert!(kernel.shm().is_empty());
        assert_eq!(kernel.memory().free_frames(), DEFAULT_MEMORY_FRAMES);
    }

    /// Areas sorted, disjoint, page aligned, below the kernel, and every
    /// resident page mapped inside its own area.
    fn check_areas(user: &User, mapped: &BTreeSet<usize>) {
        let inner = user.process().inner_exclusive_access();
        let ms = &inner.memory_set;
        let mut last_end = 0;
        let mut pages = BTreeSet::new();
        for area in ms.areas() {
            let (start, end) = (area.start_va().0, area.end_va().0);
            assert!(start % PAGE_SIZE == 0 && end % PAGE_SIZE == 0);
            assert!(last_end <= start && start < end && end <= KERNBASE);
            last_end = end;
            pages.extend((start..end).step_by(PAGE_SIZE));
            for vpn in area.resident_pages() {
                let va = VirtAddr::from(vpn).0;
                assert!(start <= va && va < end);
                assert!(ms.translate(vpn).is_some());
            }
        }
        assert_eq!(&pages, mapped);
    }

    #[test]
    fn random_mmap_munmap() {
        const BASE: usize = 0x0100_0000;
        const SLOTS: usize = 64;
        let kernel = boot(256);
        let user = User::spawn(&kernel).unwrap();
        let mut rng = rand::thread_rng();
        let mut mapped = BTreeSet::new();
        let mut stamp = std::collections::BTreeMap::new();
        for _ in 0..500 {
            let page = BASE + rng.gen_range(0..SLOTS) * PAGE_SIZE;
            let pages = rng.gen_range(1..8);
            let range: Vec<usize> = (0..pages).map(|i| page + i * PAGE_SIZE).collect();
            match rng.gen_range(0..3) {
                0 => {
                    let ret = user.mmap(page, pages * PAGE_SIZE, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, 0, 0);
                    let free = range.iter().all(|p| !mapped.contains(p));
                    assert_eq!(ret != MAP_FAILED, free);
                    if free {
                        assert_eq!(ret as usize, page);
                        mapped.extend(range.iter().copied());
                    }
                }
                1 => {
                    let ret = user.munmap(page, pages * PAGE_SIZE);
                    assert_eq!(ret == 0, mapped.contains(&page));
                    if ret == 0 {
                        for p in range.iter() {
                            mapped.remove(p);
                            stamp.remove(p);
                        }
                    }
                }
                _ => {
                    let value: u8 = rng.gen_range(1..=255);
                    if mapped.contains(&page) {
                        user.store(page, &[value]).unwrap();
                        stamp.insert(page, value);
                    }
                }
            }
            check_areas(&user, &mapped);
            for (p, value) in stamp.iter() {
                assert_eq!(user.load_byte(*p), Ok(*value));
            }
            // fresh pages of an anonymous mapping read as zero
            if let Some(p) = mapped.iter().find(|p| !stamp.contains_key(p)) {
                assert_eq!(user.load_byte(*p), Ok(0));
            }
        }
        assert!(user.is_alive());
        drop(user);
        assert_eq!(kernel.memory().free_frames(), 256);
    }
}

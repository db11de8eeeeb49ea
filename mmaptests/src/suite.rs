//! The user-level mmap test suite: anonymous mappings, partial munmap,
//! alignment checks, file mappings and shared memory.
use crate::ramfs::RamFs;
use crate::user::User;
use std::fmt::{self, Display, Formatter};
use vmos::config::KERNBASE;
use vmos::fs::OpenFlags;
use vmos::syscall::{MAP_ANONYMOUS, MAP_FAILED, PROT_READ, PROT_WRITE};

#[derive(Debug)]
pub struct Failure {
    pub test: &'static str,
    pub line: u32,
    pub what: &'static str,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed on line {}: {}", self.test, self.line, self.what)
    }
}

pub type TestResult = Result<(), Failure>;

macro_rules! fail {
    ($test:expr, $what:expr) => {
        return Err(Failure {
            test: $test,
            line: line!(),
            what: $what,
        })
    };
}

/// what `trywrite` stores
const PATTERN: &[u8; 8] = b"abcdefgh";

fn trywrite(user: &User, target: usize) -> Result<(), i32> {
    user.store(target, PATTERN)
}

/// Run `fun` in a forked child that is expected to be killed by it.
fn control(
    test: &'static str,
    user: &User,
    fun: impl FnOnce(&User) -> Result<(), i32>,
    failstr: &'static str,
) -> TestResult {
    let child = match user.fork() {
        Some(child) => child,
        None => fail!(test, "fork"),
    };
    let survived = fun(&child).is_ok();
    if survived {
        child.exit(0);
    }
    user.wait();
    if survived {
        fail!(test, failstr);
    }
    Ok(())
}

/// Test mmap() with MAP_ANONYMOUS; test clean munmap().
pub fn anontest(user: &User) -> TestResult {
    const T: &str = "anontest";
    control(T, user, |u| trywrite(u, KERNBASE - 0x1100), "control 1 succeeded?")?;

    let addr = user.mmap(0, 0x4000, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, 0, 0);
    if addr == MAP_FAILED {
        fail!(T, "mmap");
    }
    let addr = addr as usize;
    if trywrite(user, addr).is_err() {
        fail!(T, "write");
    }
    if user.munmap(0x4000, 0x4000) != -1 {
        fail!(T, "munmap control succeeded?");
    }
    if user.munmap(addr, 0x4000) < 0 {
        fail!(T, "munmap");
    }
    // was it really unmapped?
    control(T, user, |u| trywrite(u, addr), "control 2 succeeded?")?;
    println!("anontest done.");
    Ok(())
}

/// Test mmap() at a fixed address. Test partial munmap().
pub fn munmaptest(user: &User) -> TestResult {
    const T: &str = "munmaptest";
    let hint = 0x00f0_0000;
    let addr = user.mmap(hint, 0xf000, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, 0, 0);
    if addr == MAP_FAILED {
        fail!(T, "mmap");
    } else if addr as usize != hint {
        fail!(T, "hint");
    }
    let addr = addr as usize;
    let write = |target: usize| trywrite(user, target).is_ok();

    if user.munmap(addr, 0x3000) < 0 {
        fail!(T, "munmap start");
    }
    control(T, user, |u| trywrite(u, 0x00f0_1000), "control 1 succeeded?")?;
    if !write(0x00f0_4000) {
        fail!(T, "write");
    }

    // 0x00f0_f000 不在映射内，区间只需起始页已映射
    if user.munmap(addr + 0xe000, 0x2000) < 0 {
        fail!(T, "munmap end");
    }
    control(T, user, |u| trywrite(u, 0x00f0_e000), "control 2 succeeded?")?;
    if !write(0x00f0_a000) {
        fail!(T, "write");
    }

    if user.munmap(addr + 0x8000, 0x2000) < 0 {
        fail!(T, "munmap middle");
    }
    if !write(0x00f0_5000) {
        fail!(T, "write");
    }
    control(T, user, |u| trywrite(u, 0x00f0_9000), "control 3 succeeded?")?;
    if !write(0x00f0_c000) {
        fail!(T, "write");
    }

    // cleanup.
    if user.munmap(addr + 0x3000, 0x4000) < 0 {
        fail!(T, "cleanup");
    }
    if user.munmap(addr + 0xb000, 0x3000) < 0 {
        fail!(T, "cleanup");
    }
    println!("munmaptest done.");
    Ok(())
}

/// Check if mmap() properly rejects unaligned length arguments.
pub fn alignmenttest(user: &User) -> TestResult {
    const T: &str = "alignmenttest";
    if user.mmap(0, 0x1337, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, 0, 0) != MAP_FAILED {
        fail!(T, "mmap");
    }
    println!("alignmenttest done.");
    Ok(())
}

/// Test mapping files into memory, as well as reading from and writing
/// into them.
pub fn filetest(user: &User, fs: &RamFs) -> TestResult {
    const T: &str = "filetest";
    let file = match fs.open("/home/mapfile", OpenFlags::RDWR | OpenFlags::CREATE) {
        Some(file) => file,
        None => fail!(T, "open"),
    };
    let mut buf = [b'A'; 128];
    buf[127] = 0;
    if file.write(&buf) != 128 {
        fail!(T, "write");
    }
    let fd = user.install(file);
    if fd < 0 {
        fail!(T, "open");
    }
    let fd = fd as usize;

    // no MAP_PRIVATE: a shared mapping of the file
    let addr = user.mmap(0, 0x1000, PROT_READ | PROT_WRITE, 0, fd, 0);
    if addr == MAP_FAILED {
        fail!(T, "mmap");
    }
    let addr = addr as usize;
    let mut mapped = [0u8; 128];
    if user.load(addr, &mut mapped).is_err() || mapped != buf {
        fail!(T, "file contents");
    }
    if user.load_byte(addr + 200) != Ok(0) {
        fail!(T, "padding zeroes");
    }
    if user.store(addr, &[b'B'; 127]).is_err() {
        fail!(T, "write mapping");
    }
    if user.msync(addr, 0x1000) < 0 {
        fail!(T, "msync");
    }
    if user.munmap(addr, 0x1000) < 0 {
        fail!(T, "munmap");
    }
    if user.close(fd) < 0 {
        fail!(T, "close");
    }

    let file = match fs.open("/home/mapfile", OpenFlags::RDONLY) {
        Some(file) => file,
        None => fail!(T, "open"),
    };
    let mut buf = [0u8; 127];
    if file.read(&mut buf) != 127 {
        fail!(T, "read");
    }
    if buf.iter().any(|b| *b != b'B') {
        fail!(T, "modified contents");
    }
    fs.unlink("/home/mapfile");
    println!("filetest done.");
    Ok(())
}

/// Map the object in a child, write across the page boundary, unmap.
fn shmtest_write(user: &User, fd: usize) -> TestResult {
    const T: &str = "shmtest";
    let child = match user.fork() {
        Some(child) => child,
        None => fail!(T, "fork"),
    };
    let result = (|| -> TestResult {
        let addr = child.mmap(0, 0x2000, PROT_READ | PROT_WRITE, 0, fd, 0);
        if addr == MAP_FAILED {
            fail!(T, "mmap");
        }
        let addr = addr as usize;
        // test crossing the page boundary.
        if child.store(addr + 0x0ff0, &[b'A'; 256]).is_err() {
            fail!(T, "write");
        }
        if child.munmap(addr, 0x2000) < 0 {
            fail!(T, "munmap");
        }
        Ok(())
    })();
    child.exit(0);
    user.wait();
    result
}

/// Map the object read-only in a child, check the content and that a
/// write without `PROT_WRITE` kills.
fn shmtest_read(user: &User, fd: usize) -> TestResult {
    const T: &str = "shmtest";
    let child = match user.fork() {
        Some(child) => child,
        None => fail!(T, "fork"),
    };
    let result = (|| -> TestResult {
        // notice the lack of PROT_WRITE.
        let addr = child.mmap(0, 0x2000, PROT_READ, 0, fd, 0);
        if addr == MAP_FAILED {
            fail!(T, "mmap");
        }
        let addr = addr as usize;
        let mut content = [0u8; 256];
        if child.load(addr + 0x0ff0, &mut content).is_err() || content.iter().any(|b| *b != b'A') {
            fail!(T, "shmem content");
        }
        control(T, &child, |u| trywrite(u, addr), "writing without PROT_WRITE succeeded?")?;
        if child.munmap(addr, 0x2000) < 0 {
            fail!(T, "munmap");
        }
        Ok(())
    })();
    child.exit(0);
    user.wait();
    result
}

/// Test mapping shared memory segments.
pub fn shmtest(user: &User) -> TestResult {
    const T: &str = "shmtest";
    let flags = (OpenFlags::RDWR | OpenFlags::CREATE).bits();
    if user.shm_open("noslash", flags) != -1 {
        fail!(T, "shm name must start with a slash");
    }
    if user.shm_open("/multi/slash", flags) != -1 {
        fail!(T, "shm name must have only one slash");
    }
    let fd = user.shm_open("/testmem", flags);
    if fd < 0 {
        fail!(T, "shm_open");
    }
    let fd = fd as usize;
    if user.ftruncate(fd, 0x2000) < 0 {
        fail!(T, "ftruncate");
    }
    shmtest_write(user, fd)?;
    shmtest_read(user, fd)?;
    // both children unmapped and exited, nobody maps the object any more
    if user.shm_stat(fd) != 0 {
        fail!(T, "shm_stat");
    }
    user.close(fd);
    if user.shm_unlink("/testmem") < 0 {
        fail!(T, "shm_unlink");
    }
    println!("shmtest done.");
    Ok(())
}

/// Run every test in order, stopping at the first failure.
pub fn run_all(user: &User, fs: &RamFs) -> TestResult {
    anontest(user)?;
    munmaptest(user)?;
    alignmenttest(user)?;
    filetest(user, fs)?;
    shmtest(user)?;
    println!("ALL TESTS PASSED.");
    Ok(())
}

//! The user/kernel boundary end to end: the syscall register ABI, argument
//! passing, console traffic, and the copy scenario.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use kernel::userprog::{build_image, exception, syscall};
use kernel::{Kernel, KernelConfig};
use kernel_fuse::test_utils::*;
use machine::PAGE_SIZE;

use syscall::{
    invoke, CONSOLE_INPUT, CONSOLE_OUTPUT, SYSCALL_CLOSE, SYSCALL_CREATE, SYSCALL_EXIT,
    SYSCALL_JOIN, SYSCALL_OPEN, SYSCALL_READ, SYSCALL_WRITE,
};

fn install_program(kernel: &Arc<Kernel>, path: &str, uninit_pages: usize) {
    let code = vec![0u8; PAGE_SIZE];
    let image = build_image(0, &code, 0, &[], (uninit_pages * PAGE_SIZE) as u32);
    kernel.fs.create(path, 0, false).unwrap();
    let file = kernel.fs.open(path).unwrap();
    assert_eq!(file.write(&image), image.len());
}

/// Read a NUL-terminated string out of user memory the way a user program
/// manipulating its own data would.
fn user_string(kernel: &Arc<Kernel>, mut addr: usize) -> String {
    let mut bytes = Vec::new();
    loop {
        let byte = exception::user_read(kernel, addr, 1) as u8;
        if byte == 0 {
            return String::from_utf8(bytes).unwrap();
        }
        bytes.push(byte);
        addr += 1;
    }
}

#[test]
fn exec_and_join_round_trip_the_exit_status() {
    setup_logger(log::LevelFilter::Warn);
    let kernel = boot_fresh();
    install_program(&kernel, "answer", 2);
    kernel.register_program("answer", |k| {
        invoke(k, SYSCALL_EXIT, [42, 0, 0, 0]);
    });

    let id = kernel.exec("answer", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(42));
    // The id is collected; joining again fails.
    assert_eq!(kernel.join(id), None);
}

#[test]
fn exec_passes_argv_on_the_user_stack() {
    let kernel = boot_fresh();
    install_program(&kernel, "args", 2);
    kernel.register_program("args", |k| {
        let argc = k.machine.read_register(4);
        let argv = k.machine.read_register(5) as usize;
        if argc != 2 {
            invoke(k, SYSCALL_EXIT, [100, 0, 0, 0]);
        }
        let first = user_string(k, exception::user_read(k, argv, 4) as usize);
        let second = user_string(k, exception::user_read(k, argv + 4, 4) as usize);
        let ok = first == "alpha" && second == "beta";
        invoke(k, SYSCALL_EXIT, [if ok { 0 } else { 101 }, 0, 0, 0]);
    });

    let id = kernel
        .exec("args", true, Some(vec!["alpha".into(), "beta".into()]))
        .unwrap();
    assert_eq!(kernel.join(id), Some(0));
}

#[test]
fn copy_program_duplicates_a_file() {
    let kernel = boot_fresh();

    kernel.fs.create("src", 0, false).unwrap();
    {
        let src = kernel.fs.open("src").unwrap();
        assert_eq!(src.write(b"hello world\n\0"), 13);
    }
    kernel.fs.create("dst", 0, false).unwrap();

    install_program(&kernel, "cp", 4);
    kernel.register_program("cp", |k| {
        let argc = k.machine.read_register(4);
        let argv = k.machine.read_register(5) as usize;
        if argc != 2 {
            invoke(k, SYSCALL_EXIT, [100, 0, 0, 0]);
        }
        let src_ptr = exception::user_read(k, argv, 4);
        let dst_ptr = exception::user_read(k, argv + 4, 4);

        let src_fid = invoke(k, SYSCALL_OPEN, [src_ptr, 0, 0, 0]);
        let dst_fid = invoke(k, SYSCALL_OPEN, [dst_ptr, 0, 0, 0]);
        if src_fid < 0 || dst_fid < 0 {
            invoke(k, SYSCALL_EXIT, [101, 0, 0, 0]);
        }

        let buffer = (2 * PAGE_SIZE) as i32; // scratch space in the data pages
        loop {
            let read = invoke(k, SYSCALL_READ, [buffer, 64, src_fid, 0]);
            if read <= 0 {
                break;
            }
            if invoke(k, SYSCALL_WRITE, [buffer, read, dst_fid, 0]) != 0 {
                invoke(k, SYSCALL_EXIT, [102, 0, 0, 0]);
            }
        }
        invoke(k, SYSCALL_CLOSE, [src_fid, 0, 0, 0]);
        invoke(k, SYSCALL_CLOSE, [dst_fid, 0, 0, 0]);
        invoke(k, SYSCALL_EXIT, [0, 0, 0, 0]);
    });

    let id = kernel
        .exec("cp", true, Some(vec!["src".into(), "dst".into()]))
        .unwrap();
    assert_eq!(kernel.join(id), Some(0));

    let dst = kernel.fs.open("dst").unwrap();
    assert_eq!(dst.length(), 13);
    let mut back = [0u8; 12];
    assert_eq!(dst.read_at(&mut back, 0), 12);
    assert_eq!(&back, b"hello world\n");
    assert!(kernel.fs.check());
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn console_echo_through_the_abi() {
    let captured: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::boot_with_console(
        KernelConfig::default(),
        ram_disk(),
        true,
        Box::new(Cursor::new(b"ping\nrest".to_vec())),
        Box::new(SharedWriter(captured.clone())),
    );

    install_program(&kernel, "echo", 4);
    kernel.register_program("echo", |k| {
        let buffer = (2 * PAGE_SIZE) as i32;
        // Console reads stop after the newline.
        let read = invoke(k, SYSCALL_READ, [buffer, 64, CONSOLE_INPUT, 0]);
        invoke(k, SYSCALL_WRITE, [buffer, read, CONSOLE_OUTPUT, 0]);
        invoke(k, SYSCALL_EXIT, [read, 0, 0, 0]);
    });

    let id = kernel.exec("echo", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(5));
    assert_eq!(&*captured.lock().unwrap(), b"ping\n");
}

#[test]
fn syscall_error_paths_return_minus_one() {
    let kernel = boot_fresh();

    // Null path pointer.
    assert_eq!(invoke(&kernel, SYSCALL_CREATE, [0, 0, 0, 0]), -1);
    assert_eq!(invoke(&kernel, SYSCALL_OPEN, [0, 0, 0, 0]), -1);
    // Console ids cannot be closed.
    assert_eq!(invoke(&kernel, SYSCALL_CLOSE, [1, 0, 0, 0]), -1);
    // Unknown join target.
    assert_eq!(invoke(&kernel, SYSCALL_JOIN, [7, 0, 0, 0]), -1);
    // Bad read arguments.
    assert_eq!(invoke(&kernel, SYSCALL_READ, [0, 64, 2, 0]), -1);
}

#[test]
fn full_descriptor_table_rejects_opens() {
    let kernel = boot_fresh();
    kernel.fs.create("f", 0, false).unwrap();

    let current = kernel.sched.current();
    let mut fids = Vec::new();
    loop {
        let file = kernel.fs.open("f").unwrap();
        match current.add_file(file) {
            Some(fid) => fids.push(fid),
            None => break,
        }
    }
    assert_eq!(fids.len(), kernel::config::MAX_OPEN_FILES - 2);

    for fid in fids {
        assert!(current.remove_file(fid).is_some());
    }
    assert!(kernel.fs.check());
}

#[test]
fn exec_of_a_bad_image_fails() {
    let kernel = boot_fresh();
    kernel.fs.create("garbage", 0, false).unwrap();
    {
        let file = kernel.fs.open("garbage").unwrap();
        assert_eq!(file.write(b"not an executable image"), 23);
    }
    assert_eq!(kernel.exec("garbage", true, None), None);
    assert_eq!(kernel.exec("missing", true, None), None);
    // Neither failure leaked a user-thread slot or a swap file.
    assert!(!kernel.fs.list().iter().any(|p| p.contains("SWAP.")));
}

#[test]
fn halt_stops_the_machine() {
    let kernel = boot_fresh();
    assert!(!kernel.machine.interrupt.is_halted());
    invoke(&kernel, syscall::SYSCALL_HALT, [0, 0, 0, 0]);
    assert!(kernel.machine.interrupt.is_halted());
}

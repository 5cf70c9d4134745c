//! The syscall register ABI.
//!
//! The id arrives in register 2, arguments in 4–7, and the result goes back
//! into 2. After every call the program counter advances one instruction,
//! branch-delay slot included. Failures surface as `-1` with a log line;
//! they never kill the caller.

use std::sync::Arc;

use machine::{NEXT_PC_REG, PC_REG, PREV_PC_REG};

use crate::config::PATH_NAME_MAX_LEN;
use crate::Kernel;

use super::transfer;

pub const SYSCALL_HALT: i32 = 0;
pub const SYSCALL_EXIT: i32 = 1;
pub const SYSCALL_EXEC: i32 = 2;
pub const SYSCALL_JOIN: i32 = 3;
pub const SYSCALL_CREATE: i32 = 4;
pub const SYSCALL_OPEN: i32 = 5;
pub const SYSCALL_READ: i32 = 6;
pub const SYSCALL_WRITE: i32 = 7;
pub const SYSCALL_CLOSE: i32 = 8;
pub const SYSCALL_REMOVE: i32 = 9;
pub const SYSCALL_MKDIR: i32 = 10;
pub const SYSCALL_CD: i32 = 11;

/// Reserved file ids; user files start at 2.
pub const CONSOLE_INPUT: i32 = 0;
pub const CONSOLE_OUTPUT: i32 = 1;

/// The largest argv a user program can pass to `exec`.
const MAX_EXEC_ARGS: usize = 16;

/// Execute one syscall instruction on behalf of user code: marshal the id
/// and arguments into registers, dispatch, and return what lands in
/// register 2.
pub fn invoke(kernel: &Arc<Kernel>, id: i32, args: [i32; 4]) -> i32 {
    let machine = &kernel.machine;
    machine.write_register(2, id);
    for (index, arg) in args.iter().enumerate() {
        machine.write_register(4 + index, *arg);
    }
    handle_syscall(kernel);
    machine.read_register(2)
}

/// Dispatch the syscall currently described by the machine registers.
pub fn handle_syscall(kernel: &Arc<Kernel>) {
    let machine = &kernel.machine;
    let id = machine.read_register(2);

    let result = match id {
        SYSCALL_HALT => {
            log::debug!("shutdown, initiated by user program");
            kernel.halt();
            0
        }
        SYSCALL_EXIT => {
            let status = machine.read_register(4);
            log::debug!(
                "`exit` requested by `{}` with status {}",
                kernel.sched.current().name(),
                status
            );
            kernel.exit_current(status) // never returns
        }
        SYSCALL_EXEC => sys_exec(kernel),
        SYSCALL_JOIN => sys_join(kernel),
        SYSCALL_CREATE => sys_create(kernel, false),
        SYSCALL_MKDIR => sys_create(kernel, true),
        SYSCALL_OPEN => sys_open(kernel),
        SYSCALL_READ => sys_read(kernel),
        SYSCALL_WRITE => sys_write(kernel),
        SYSCALL_CLOSE => sys_close(kernel),
        SYSCALL_REMOVE => sys_remove(kernel),
        SYSCALL_CD => sys_cd(kernel),
        _ => {
            log::error!("unexpected syscall id {}", id);
            kernel.exit_current(-1)
        }
    };

    machine.write_register(2, result);
    increment_pc(kernel);
}

/// Advance past the syscall instruction, honoring the branch-delay slot.
fn increment_pc(kernel: &Arc<Kernel>) {
    let machine = &kernel.machine;
    let pc = machine.read_register(PC_REG);
    machine.write_register(PREV_PC_REG, pc);
    let pc = machine.read_register(NEXT_PC_REG);
    machine.write_register(PC_REG, pc);
    machine.write_register(NEXT_PC_REG, pc + 4);
}

/// Fetch a path argument from the register `reg`.
fn path_arg(kernel: &Arc<Kernel>, reg: usize) -> Option<String> {
    let addr = kernel.machine.read_register(reg);
    if addr == 0 {
        log::debug!("error: address to path string is null");
        return None;
    }
    let path = transfer::read_string_from_user(kernel, addr as usize, PATH_NAME_MAX_LEN);
    if path.is_none() {
        log::debug!(
            "error: path string unreadable or longer than {} bytes",
            PATH_NAME_MAX_LEN
        );
    }
    path
}

fn sys_create(kernel: &Arc<Kernel>, is_dir: bool) -> i32 {
    let Some(path) = path_arg(kernel, 4) else {
        return -1;
    };
    match kernel.fs.create(&path, 0, is_dir) {
        Ok(()) => 0,
        Err(err) => {
            log::debug!("error: could not create `{}`: {}", path, err);
            -1
        }
    }
}

fn sys_remove(kernel: &Arc<Kernel>) -> i32 {
    let Some(path) = path_arg(kernel, 4) else {
        return -1;
    };
    match kernel.fs.remove(&path) {
        Ok(()) => 0,
        Err(err) => {
            log::debug!("error: could not remove `{}`: {}", path, err);
            -1
        }
    }
}

fn sys_open(kernel: &Arc<Kernel>) -> i32 {
    let Some(path) = path_arg(kernel, 4) else {
        return -1;
    };
    let file = match kernel.fs.open(&path) {
        Ok(file) => file,
        Err(err) => {
            log::debug!("error: could not open `{}`: {}", path, err);
            return -1;
        }
    };
    match kernel.sched.current().add_file(file) {
        Some(fid) => fid as i32,
        None => {
            log::debug!("error: file descriptor table is full");
            -1
        }
    }
}

fn sys_close(kernel: &Arc<Kernel>) -> i32 {
    let fid = kernel.machine.read_register(4);
    if fid < 2 {
        log::debug!("error: file id must be at least 2");
        return -1;
    }
    match kernel.sched.current().remove_file(fid as usize) {
        Some(_file) => 0, // dropping the handle closes it
        None => {
            log::debug!("error: could not close file with id {}", fid);
            -1
        }
    }
}

fn sys_read(kernel: &Arc<Kernel>) -> i32 {
    let machine = &kernel.machine;
    let buf_addr = machine.read_register(4);
    let size = machine.read_register(5);
    let fid = machine.read_register(6);
    if buf_addr == 0 || size <= 0 || fid < 0 {
        log::debug!("error: bad `read` arguments");
        return -1;
    }

    let data = if fid == CONSOLE_INPUT {
        kernel.console.read_buffer(size as usize)
    } else {
        let Some(file) = kernel.sched.current().get_file(fid as usize) else {
            log::debug!("error: no open file with id {}", fid);
            return -1;
        };
        let mut data = vec![0u8; size as usize];
        let read = file.read(&mut data);
        data.truncate(read);
        data
    };

    if !transfer::write_buffer_to_user(kernel, &data, buf_addr as usize) {
        log::debug!("error: bad user buffer in `read`");
        return -1;
    }
    data.len() as i32
}

fn sys_write(kernel: &Arc<Kernel>) -> i32 {
    let machine = &kernel.machine;
    let buf_addr = machine.read_register(4);
    let size = machine.read_register(5);
    let fid = machine.read_register(6);
    if buf_addr == 0 || size <= 0 || fid < 0 {
        log::debug!("error: bad `write` arguments");
        return -1;
    }

    let Some(data) = transfer::read_buffer_from_user(kernel, buf_addr as usize, size as usize)
    else {
        log::debug!("error: bad user buffer in `write`");
        return -1;
    };

    if fid == CONSOLE_OUTPUT {
        kernel.console.write_buffer(&data);
        0
    } else {
        let Some(file) = kernel.sched.current().get_file(fid as usize) else {
            log::debug!("error: no open file with id {}", fid);
            return -1;
        };
        if file.write(&data) == data.len() {
            0
        } else {
            -1
        }
    }
}

fn sys_exec(kernel: &Arc<Kernel>) -> i32 {
    let Some(path) = path_arg(kernel, 4) else {
        return -1;
    };
    let can_join = kernel.machine.read_register(5) != 0;
    let argv_addr = kernel.machine.read_register(6);

    let argv = if argv_addr != 0 {
        match read_argv(kernel, argv_addr as usize) {
            Some(argv) => Some(argv),
            None => {
                log::debug!("error: bad argv for `exec`");
                return -1;
            }
        }
    } else {
        None
    };

    log::debug!("`exec` requested for `{}`", path);
    match kernel.exec(&path, can_join, argv) {
        Some(space_id) => space_id as i32,
        None => -1,
    }
}

/// An argv is a user array of string pointers ending in a null pointer.
fn read_argv(kernel: &Arc<Kernel>, argv_addr: usize) -> Option<Vec<String>> {
    let mut args = Vec::new();
    for index in 0..MAX_EXEC_ARGS {
        let ptr = transfer::read_mem(kernel, argv_addr + index * 4, 4)?;
        if ptr == 0 {
            return Some(args);
        }
        args.push(transfer::read_string_from_user(
            kernel,
            ptr as usize,
            PATH_NAME_MAX_LEN,
        )?);
    }
    Some(args)
}

fn sys_join(kernel: &Arc<Kernel>) -> i32 {
    let space_id = kernel.machine.read_register(4);
    if space_id < 0 {
        log::debug!("error: space id must be non-negative");
        return -1;
    }
    log::debug!("`join` requested for space {}", space_id);
    match kernel.join(space_id as usize) {
        Some(status) => status,
        None => {
            log::debug!("error: no joinable thread with space id {}", space_id);
            -1
        }
    }
}

fn sys_cd(kernel: &Arc<Kernel>) -> i32 {
    let Some(path) = path_arg(kernel, 4) else {
        return -1;
    };
    match kernel.fs.find_directory(&path) {
        Some(dir_synch) => {
            kernel.sched.current().set_current_dir(dir_synch.sector());
            0
        }
        None => {
            log::debug!("error: could not change to directory `{}`", path);
            -1
        }
    }
}

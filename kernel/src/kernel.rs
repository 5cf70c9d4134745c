//! The top-level kernel object.
//!
//! Owns every process-wide collaborator — machine, scheduler, disk, console,
//! file system, VM state, statistics, user-thread table — and passes them by
//! context to the subsystems that need them. Tests boot as many kernels as
//! they like in one process; nothing here is global.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use machine::{Console, Machine, SectorDevice, Statistics, DEFAULT_PHYS_PAGES, STACK_REG};
use spin::Mutex as SpinMutex;

use crate::config::DEFAULT_PRIORITY;
use crate::fs::{FileSystem, SynchDisk};
use crate::thread::Scheduler;
use crate::userprog::{transfer, SynchConsole, UserThreads};
use crate::vm::{AddressSpace, SpaceId, Vm};

/// The build switches of the original, as runtime options. `use_tlb` turns
/// on demand paging; `vmem` adds the swap/coremap second-chance machinery
/// (and requires the TLB). The hierarchical file system is always in.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub use_tlb: bool,
    pub vmem: bool,
    pub num_phys_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            use_tlb: false,
            vmem: false,
            num_phys_pages: DEFAULT_PHYS_PAGES,
        }
    }
}

impl KernelConfig {
    /// Demand paging with swap-backed eviction.
    pub fn demand_paged(num_phys_pages: usize) -> Self {
        Self {
            use_tlb: true,
            vmem: true,
            num_phys_pages,
        }
    }
}

type ProgramBody = Arc<dyn Fn(&Arc<Kernel>) + Send + Sync>;

pub struct Kernel {
    pub config: KernelConfig,
    pub machine: Arc<Machine>,
    pub stats: Arc<Statistics>,
    pub sched: Arc<Scheduler>,
    pub fs: Arc<FileSystem>,
    pub vm: Arc<Vm>,
    pub console: Arc<SynchConsole>,
    pub user_threads: Arc<UserThreads>,
    /// Round-robin cursor for TLB refill.
    pub(crate) tlb_victim: SpinMutex<usize>,
    /// Stands in for the MIPS interpreter: the host body to run per
    /// executable path. The executable file on disk is still opened and
    /// demand-loaded; only the instruction loop is simulated.
    programs: SpinMutex<HashMap<String, ProgramBody>>,
}

impl Kernel {
    /// Boot with a disconnected console.
    pub fn boot(config: KernelConfig, device: Arc<dyn SectorDevice>, format: bool) -> Arc<Self> {
        Self::boot_with_console(
            config,
            device,
            format,
            Box::new(std::io::empty()),
            Box::new(std::io::sink()),
        )
    }

    /// Bring the machine and every kernel subsystem up, formatting or
    /// mounting the disk, then sweep stale swap files out of the root.
    pub fn boot_with_console(
        config: KernelConfig,
        device: Arc<dyn SectorDevice>,
        format: bool,
        console_input: Box<dyn Read + Send>,
        console_output: Box<dyn Write + Send>,
    ) -> Arc<Self> {
        assert!(
            !config.vmem || config.use_tlb,
            "vmem requires the TLB build"
        );

        let stats = Arc::new(Statistics::new());
        let machine = Arc::new(Machine::new(config.num_phys_pages, stats.clone()));
        if config.use_tlb {
            machine.mmu.enable_tlb();
        }
        let sched = Scheduler::new(machine.clone());
        let disk = Arc::new(SynchDisk::new(sched.clone(), device));
        let fs = FileSystem::new(sched.clone(), disk, format);
        let vm = Vm::new(config.num_phys_pages);
        let console = Arc::new(SynchConsole::new(
            sched.clone(),
            Console::new(console_input, console_output),
        ));

        let kernel = Arc::new(Self {
            config,
            machine,
            stats,
            sched,
            fs,
            vm,
            console,
            user_threads: Arc::new(UserThreads::new()),
            tlb_victim: SpinMutex::new(0),
            programs: SpinMutex::new(HashMap::new()),
        });
        kernel.fs.cleanup();
        kernel
    }

    /// Install the host body that plays the part of the machine's
    /// instruction loop for `path`.
    pub fn register_program(
        &self,
        path: &str,
        body: impl Fn(&Arc<Kernel>) + Send + Sync + 'static,
    ) {
        self.programs.lock().insert(path.to_string(), Arc::new(body));
    }

    /// Start a user program: open its executable, build its address space
    /// (swap file included), and fork the thread that runs it. Returns the
    /// new space id, the handle `join` takes.
    pub fn exec(
        self: &Arc<Self>,
        path: &str,
        can_join: bool,
        argv: Option<Vec<String>>,
    ) -> Option<SpaceId> {
        let exec_file = match self.fs.open(path) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("`exec`: could not open `{}`: {}", path, err);
                return None;
            }
        };

        let Some(space_id) = self.user_threads.reserve() else {
            log::debug!("`exec`: user-thread table is full");
            return None;
        };
        let Some(space) = AddressSpace::new(
            &self.machine,
            &self.fs,
            &self.vm,
            &self.config,
            exec_file,
            space_id,
        ) else {
            log::debug!("`exec`: `{}` is not a valid executable", path);
            self.user_threads.release(space_id);
            return None;
        };
        self.vm.register(space_id, space.clone());

        let body = self.programs.lock().get(path).cloned();
        let kernel = self.clone();
        let program_path = path.to_string();
        let parent_dir = self.sched.current().current_dir();

        let thread = self.sched.fork(path, DEFAULT_PRIORITY, can_join, move || {
            kernel.run_user_program(&program_path, argv, body);
        });
        // The thread is ready but cannot run until we block, so finish
        // wiring it up before that can happen.
        thread.set_current_dir(parent_dir);
        thread.set_space(space, space_id);
        self.user_threads.bind(space_id, thread);
        Some(space_id)
    }

    fn run_user_program(
        self: &Arc<Self>,
        path: &str,
        argv: Option<Vec<String>>,
        body: Option<ProgramBody>,
    ) {
        let current = self.sched.current();
        let space = current.space().expect("user thread without a space");
        space.init_registers(&self.machine);
        space.restore_state(&self.machine);
        if let Some(args) = argv {
            self.write_args(&args);
        }

        match body {
            Some(body) => body(self),
            None => {
                log::warn!("no program registered for `{}`; exiting", path);
                self.exit_current(-1);
            }
        }
        // A body that returns without calling `exit` finishes with status 0
        // through the fork wrapper.
    }

    /// Materialize `(argc, argv)` on the new program's stack: the strings
    /// first, then the pointer array, with registers 4/5 pointing at them.
    fn write_args(&self, args: &[String]) {
        let machine = &self.machine;
        let mut sp = machine.read_register(STACK_REG) as usize;

        let mut pointers = Vec::with_capacity(args.len());
        for arg in args {
            sp -= arg.len() + 1;
            transfer::write_buffer_to_user(self, arg.as_bytes(), sp);
            transfer::write_mem(self, sp + arg.len(), 1, 0);
            pointers.push(sp as u32);
        }

        sp &= !3;
        sp -= (pointers.len() + 1) * core::mem::size_of::<u32>();
        for (index, pointer) in pointers.iter().enumerate() {
            transfer::write_mem(self, sp + index * 4, 4, *pointer as i32);
        }
        transfer::write_mem(self, sp + pointers.len() * 4, 4, 0);

        // Room below the argv block, per the calling convention.
        machine.write_register(STACK_REG, (sp - 16) as i32);
        machine.write_register(4, args.len() as i32);
        machine.write_register(5, sp as i32);
    }

    /// Terminate the calling thread: close its files, tear its address
    /// space down (frames, executable, swap file), publish the status.
    pub fn exit_current(&self, status: i32) -> ! {
        let current = self.sched.current();
        log::debug!("thread `{}` exiting with status {}", current.name(), status);

        current.close_all_files();
        let space_id = current.space_id();
        if let Some(space) = current.take_space() {
            space.teardown(&self.vm, &self.fs);
        }
        if let Some(id) = space_id {
            // Joinable threads stay in the table until joined, so a late
            // `join` can still collect the status.
            if !current.can_join() {
                self.user_threads.release(id);
            }
        }
        self.sched.finish_current(status)
    }

    /// Wait for the thread running space `id` and collect its exit status.
    pub fn join(&self, id: SpaceId) -> Option<i32> {
        let thread = self.user_threads.get(id)?;
        if !thread.can_join() {
            return None;
        }
        let status = thread.join();
        self.user_threads.release(id);
        Some(status)
    }

    /// Shut the machine down, reporting the counters first.
    pub fn halt(&self) {
        self.stats.report();
        self.machine.interrupt.halt();
    }
}

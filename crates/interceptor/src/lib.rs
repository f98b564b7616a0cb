//! LD_PRELOAD shim for build children
//!
//! Preloaded into every process the traced build spawns. Wraps the exec
//! family and `posix_spawn` to do two things:
//!
//! - compiler invocations get the flags from `REPROBUILD_COMPILER_FLAGS`
//!   spliced in right after `argv[0]`, so build systems that ignore
//!   `CFLAGS` still compile reproducibly;
//! - `git clone` invocations are performed here, the resulting commit is
//!   appended to the file named by `REPROBUILD_LOG_GIT_CLONES`, and the
//!   original call is turned into a successful no-op so the clone does not
//!   run twice.
//!
//! This library runs inside foreign processes: it talks to the outside
//! world through stdio, the environment, and the clone-log file only, and
//! links nothing from the recorder.

use std::ffi::{CStr, CString};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::OnceLock;

use libc::{c_char, c_int, pid_t, posix_spawn_file_actions_t, posix_spawnattr_t};

const FALLBACK_CLONE_LOG: &str = "/tmp/git_clone_commits.log";

/// At most this many tokens are spliced into a compiler command line.
const MAX_EXTRA_ARGS: usize = 63;

const COMPILERS: &[&str] = &["gcc", "g++", "clang", "clang++", "cc", "c++"];

// ---------------------------------------------------------------------
// real symbol resolution
// ---------------------------------------------------------------------

type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;
type ExecvFn = unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int;
type PosixSpawnFn = unsafe extern "C" fn(
    *mut pid_t,
    *const c_char,
    *const posix_spawn_file_actions_t,
    *const posix_spawnattr_t,
    *const *mut c_char,
    *const *mut c_char,
) -> c_int;

static REAL_EXECVE: OnceLock<usize> = OnceLock::new();
static REAL_EXECV: OnceLock<usize> = OnceLock::new();
static REAL_EXECVP: OnceLock<usize> = OnceLock::new();
static REAL_EXECVPE: OnceLock<usize> = OnceLock::new();
static REAL_POSIX_SPAWN: OnceLock<usize> = OnceLock::new();

/// Resolve the next definition of `name` once; later calls hit the cache.
fn real_addr(cell: &OnceLock<usize>, name: &CStr) -> usize {
    *cell.get_or_init(|| {
        let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
        if sym.is_null() {
            let _ = writeln!(
                std::io::stderr(),
                "reprobuild interceptor: cannot resolve {}",
                name.to_string_lossy()
            );
            std::process::exit(1);
        }
        sym as usize
    })
}

fn real_execve() -> ExecveFn {
    unsafe { std::mem::transmute(real_addr(&REAL_EXECVE, c"execve")) }
}

fn real_execv() -> ExecvFn {
    unsafe { std::mem::transmute(real_addr(&REAL_EXECV, c"execv")) }
}

fn real_execvp() -> ExecvFn {
    unsafe { std::mem::transmute(real_addr(&REAL_EXECVP, c"execvp")) }
}

fn real_execvpe() -> ExecveFn {
    unsafe { std::mem::transmute(real_addr(&REAL_EXECVPE, c"execvpe")) }
}

fn real_posix_spawn() -> PosixSpawnFn {
    unsafe { std::mem::transmute(real_addr(&REAL_POSIX_SPAWN, c"posix_spawn")) }
}

unsafe extern "C" {
    static environ: *const *mut c_char;
}

// ---------------------------------------------------------------------
// argv handling
// ---------------------------------------------------------------------

/// Owned argv whose pointer array stays valid for the duration of a real
/// exec call. The heap buffers backing `strings` do not move when the
/// struct does, so `ptrs` remains sound.
struct ArgvBuf {
    _strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl ArgvBuf {
    fn new(strings: Vec<CString>) -> Self {
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Self {
            _strings: strings,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    fn as_spawn_ptr(&self) -> *const *mut c_char {
        self.ptrs.as_ptr() as *const *mut c_char
    }
}

/// Copy a NULL-terminated C argv into owned strings.
unsafe fn argv_strings(argv: *const *const c_char) -> Vec<CString> {
    let mut out = Vec::new();
    if argv.is_null() {
        return out;
    }
    let mut i = 0;
    loop {
        let ptr = unsafe { *argv.add(i) };
        if ptr.is_null() {
            break;
        }
        out.push(unsafe { CStr::from_ptr(ptr) }.to_owned());
        i += 1;
    }
    out
}

/// New argv with the extra flags inserted immediately after `argv[0]`.
fn spliced_argv(original: &[CString], extra_flags: &str) -> ArgvBuf {
    let mut strings = Vec::with_capacity(original.len() + MAX_EXTRA_ARGS);
    let mut rest = original.iter();

    if let Some(arg0) = rest.next() {
        strings.push(arg0.clone());
    }
    for token in extra_flags.split_whitespace().take(MAX_EXTRA_ARGS) {
        if let Ok(flag) = CString::new(token) {
            strings.push(flag);
        }
    }
    strings.extend(rest.cloned());

    ArgvBuf::new(strings)
}

// ---------------------------------------------------------------------
// classification
// ---------------------------------------------------------------------

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_compiler_path(path: *const c_char) -> bool {
    if path.is_null() {
        return false;
    }
    let path = unsafe { CStr::from_ptr(path) };
    match path.to_str() {
        Ok(path) => COMPILERS.contains(&basename(path)),
        Err(_) => false,
    }
}

fn compiler_flags() -> Option<String> {
    std::env::var("REPROBUILD_COMPILER_FLAGS")
        .ok()
        .filter(|flags| !flags.trim().is_empty())
}

fn log_intercept(name: &str, path: *const c_char) {
    if path.is_null() {
        return;
    }
    let path = unsafe { CStr::from_ptr(path) }.to_string_lossy();
    let _ = writeln!(std::io::stdout(), "Intercepted {name}: {path}");
}

// ---------------------------------------------------------------------
// git clone interception
// ---------------------------------------------------------------------

/// When `argv` is a `git clone`, run the clone here, record the commit,
/// and report the call as handled so the wrapper can no-op it.
fn handle_git_clone(argv: &[CString]) -> bool {
    let Some(arg0) = argv.first().and_then(|a| a.to_str().ok()) else {
        return false;
    };
    if basename(arg0) != "git" {
        return false;
    }
    if argv.get(1).and_then(|a| a.to_str().ok()) != Some("clone") {
        return false;
    }

    // First two non-flag operands are the URL and the optional target dir.
    let mut url: Option<&str> = None;
    let mut target: Option<&str> = None;
    for arg in &argv[2..] {
        let Ok(arg) = arg.to_str() else { continue };
        if arg.starts_with('-') {
            continue;
        }
        if url.is_none() {
            url = Some(arg);
        } else if target.is_none() {
            target = Some(arg);
        }
    }
    let Some(url) = url else {
        return false;
    };

    let _ = writeln!(std::io::stdout(), "Intercepted git clone: {url}");

    if !spawn_real_clone(argv) {
        // The clone itself failed; the call is still consumed so it does
        // not run a second time.
        return true;
    }

    let work_dir = match target {
        Some(dir) => dir.to_string(),
        None => clone_directory(url),
    };

    if let Some(commit) = read_head_commit(&work_dir) {
        let _ = writeln!(std::io::stdout(), "Recorded commit for {url}: {commit}");
        append_clone_log(url, &commit);
    }

    true
}

/// Directory a bare `git clone <url>` produces: URL basename minus `.git`.
fn clone_directory(url: &str) -> String {
    let base = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

/// Run the real clone through the real `posix_spawn` and wait for it.
fn spawn_real_clone(argv: &[CString]) -> bool {
    let buf = ArgvBuf::new(argv.to_vec());
    let mut pid: pid_t = 0;

    let rc = unsafe {
        real_posix_spawn()(
            &mut pid,
            c"/usr/bin/git".as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            buf.as_spawn_ptr(),
            environ,
        )
    };
    if rc != 0 {
        let _ = writeln!(std::io::stdout(), "git clone spawn failed: {rc}");
        return false;
    }

    let mut status: c_int = 0;
    unsafe { libc::waitpid(pid, &mut status, 0) };

    if !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
        let _ = writeln!(
            std::io::stdout(),
            "git clone failed with exit code: {}",
            libc::WEXITSTATUS(status)
        );
        return false;
    }
    true
}

fn read_head_commit(work_dir: &str) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(work_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

fn append_clone_log(url: &str, commit: &str) {
    let path = std::env::var("REPROBUILD_LOG_GIT_CLONES")
        .unwrap_or_else(|_| FALLBACK_CLONE_LOG.to_string());
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(file, "{url} {commit}");
    }
}

// ---------------------------------------------------------------------
// wrapped entry points
// ---------------------------------------------------------------------

/// # Safety
/// Same contract as the libc function it shadows.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn execve(
    pathname: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let args = unsafe { argv_strings(argv) };
    log_intercept("execve", pathname);

    if handle_git_clone(&args) {
        return 0;
    }

    if is_compiler_path(pathname) {
        if let Some(flags) = compiler_flags() {
            let buf = spliced_argv(&args, &flags);
            // Returns only on failure; on success the image is replaced
            // and `buf` goes with it.
            return unsafe { real_execve()(pathname, buf.as_ptr(), envp) };
        }
    }

    unsafe { real_execve()(pathname, argv, envp) }
}

/// # Safety
/// Same contract as the libc function it shadows.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn execv(pathname: *const c_char, argv: *const *const c_char) -> c_int {
    let args = unsafe { argv_strings(argv) };
    log_intercept("execv", pathname);

    if handle_git_clone(&args) {
        return 0;
    }

    if is_compiler_path(pathname) {
        if let Some(flags) = compiler_flags() {
            let buf = spliced_argv(&args, &flags);
            return unsafe { real_execv()(pathname, buf.as_ptr()) };
        }
    }

    unsafe { real_execv()(pathname, argv) }
}

/// # Safety
/// Same contract as the libc function it shadows.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let args = unsafe { argv_strings(argv) };
    log_intercept("execvp", file);

    if handle_git_clone(&args) {
        return 0;
    }

    if is_compiler_path(file) {
        if let Some(flags) = compiler_flags() {
            let buf = spliced_argv(&args, &flags);
            return unsafe { real_execvp()(file, buf.as_ptr()) };
        }
    }

    unsafe { real_execvp()(file, argv) }
}

/// # Safety
/// Same contract as the libc function it shadows.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let args = unsafe { argv_strings(argv) };
    log_intercept("execvpe", file);

    if handle_git_clone(&args) {
        return 0;
    }

    if is_compiler_path(file) {
        if let Some(flags) = compiler_flags() {
            let buf = spliced_argv(&args, &flags);
            return unsafe { real_execvpe()(file, buf.as_ptr(), envp) };
        }
    }

    unsafe { real_execvpe()(file, argv, envp) }
}

/// # Safety
/// Same contract as the libc function it shadows.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_spawn(
    pid: *mut pid_t,
    path: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *mut c_char,
    envp: *const *mut c_char,
) -> c_int {
    let args = unsafe { argv_strings(argv as *const *const c_char) };
    log_intercept("posix_spawn", path);

    if handle_git_clone(&args) {
        // The caller expects a child pid it can wait on; give it one that
        // exits successfully without doing anything.
        return unsafe {
            real_posix_spawn()(
                pid,
                c"/usr/bin/true".as_ptr(),
                std::ptr::null(),
                std::ptr::null(),
                argv,
                envp,
            )
        };
    }

    if is_compiler_path(path) {
        if let Some(flags) = compiler_flags() {
            let buf = spliced_argv(&args, &flags);
            return unsafe {
                real_posix_spawn()(pid, path, file_actions, attrp, buf.as_spawn_ptr(), envp)
            };
        }
    }

    unsafe { real_posix_spawn()(pid, path, file_actions, attrp, argv, envp) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cargs(args: &[&str]) -> Vec<CString> {
        args.iter().map(|a| CString::new(*a).unwrap()).collect()
    }

    fn to_strs(buf: &ArgvBuf) -> Vec<String> {
        buf._strings
            .iter()
            .map(|s| s.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("/usr/bin/gcc"), "gcc");
        assert_eq!(basename("gcc"), "gcc");
        assert_eq!(basename("/opt/llvm/bin/clang++"), "clang++");
    }

    #[test]
    fn compiler_classification() {
        for compiler in ["gcc", "g++", "clang", "clang++", "cc", "c++"] {
            let path = CString::new(format!("/usr/bin/{compiler}")).unwrap();
            assert!(is_compiler_path(path.as_ptr()), "{compiler}");
        }

        let not_compiler = CString::new("/usr/bin/gcc-ar").unwrap();
        assert!(!is_compiler_path(not_compiler.as_ptr()));
        let linker = CString::new("/usr/bin/ld").unwrap();
        assert!(!is_compiler_path(linker.as_ptr()));
        assert!(!is_compiler_path(std::ptr::null()));
    }

    #[test]
    fn splice_inserts_after_argv0() {
        let original = cargs(&["gcc", "-c", "main.c", "-o", "main.o"]);
        let buf = spliced_argv(&original, "-ffile-prefix-map=/b=. -frandom-seed=0");

        assert_eq!(
            to_strs(&buf),
            [
                "gcc",
                "-ffile-prefix-map=/b=.",
                "-frandom-seed=0",
                "-c",
                "main.c",
                "-o",
                "main.o"
            ]
        );
    }

    #[test]
    fn splice_caps_token_count() {
        let original = cargs(&["cc", "x.c"]);
        let many: String = (0..100).map(|i| format!("-D{i} ")).collect();
        let buf = spliced_argv(&original, &many);

        // argv0 + 63 flags + 1 original argument
        assert_eq!(buf._strings.len(), 1 + MAX_EXTRA_ARGS + 1);
    }

    #[test]
    fn argv_pointers_are_null_terminated() {
        let buf = ArgvBuf::new(cargs(&["git", "status"]));
        assert_eq!(buf.ptrs.len(), 3);
        assert!(buf.ptrs[2].is_null());
        assert!(!buf.as_ptr().is_null());
    }

    #[test]
    fn clone_directory_from_url() {
        assert_eq!(clone_directory("https://example.com/dep.git"), "dep");
        assert_eq!(clone_directory("https://example.com/dep"), "dep");
        assert_eq!(clone_directory("git@host:team/dep.git"), "dep");
        assert_eq!(clone_directory("https://example.com/dep/"), "dep");
    }

    #[test]
    fn non_clone_invocations_are_not_handled() {
        assert!(!handle_git_clone(&cargs(&["git", "status"])));
        assert!(!handle_git_clone(&cargs(&["gcc", "clone"])));
        assert!(!handle_git_clone(&cargs(&["git"])));
        assert!(!handle_git_clone(&cargs(&["git", "clone"])));
        assert!(!handle_git_clone(&[]));
    }
}

use std::ffi::{CStr, c_char, c_void};
use std::fs;

const JNI_OK: i32 = 0;
const JNI_ERR: i32 = -1;

/// Dynamic-attach entry point. `options` is a stamp file path to write, or
/// `fail` to report an initialization failure.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn Agent_OnAttach(
    _vm: *mut c_void,
    options: *const c_char,
    _reserved: *mut c_void,
) -> i32 {
    if options.is_null() {
        return JNI_OK;
    }

    let options = unsafe { CStr::from_ptr(options) };
    let path = options.to_string_lossy();
    match path.as_ref() {
        "" | "fixture" => JNI_OK,
        "fail" => JNI_ERR,
        path => match fs::write(path, b"ok") {
            Ok(()) => JNI_OK,
            Err(_) => JNI_ERR,
        },
    }
}

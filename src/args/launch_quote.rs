// SPDX-License-Identifier: MIT

//! Windows Argument Quoting Rules
//!
//! The target is started with a raw command line, so the executable name and
//! any plain arguments ahead of the argument envelope must follow the
//! `CommandLineToArgvW` quoting rules.
//!
//! See "Everyone quotes command line arguments the wrong way":
//!   https://learn.microsoft.com/en-us/archive/blogs/twistylittlepassagesallalike/everyone-quotes-command-line-arguments-the-wrong-way
//!
//! The envelope itself never needs quoting; its alphabet has no whitespace
//! or quote characters.

use crate::error::BrokerError;

/// Quote the command and arguments into a single command line string.
pub fn quote_command_line(cmd: &str, args: &[String]) -> Result<String, BrokerError> {
    let mut ret = String::new();
    append_arg(&mut ret, cmd)?;
    for arg in args {
        ret.push(' ');
        append_arg(&mut ret, arg)?;
    }
    Ok(ret)
}

/// Encode the command line as the NUL terminated UTF-16 buffer the OS expects.
pub fn to_wide(cmdline: &str) -> Vec<u16> {
    cmdline.encode_utf16().chain(std::iter::once(0)).collect()
}

fn append_arg(cmd: &mut String, arg: &str) -> Result<(), BrokerError> {
    if arg.contains('\0') {
        return Err(BrokerError::launch_message("nul byte found in argument"));
    }
    if !requires_quoting(arg) {
        cmd.push_str(arg);
        return Ok(());
    }

    cmd.push('"');
    let mut backslash_count = 0;
    for c in arg.chars() {
        if c == '\\' {
            backslash_count += 1;
            continue;
        }
        if c == '"' {
            // Escape all the backslashes, and add one for the escaped '"'.
            push_n(cmd, '\\', backslash_count * 2 + 1);
        } else {
            push_n(cmd, '\\', backslash_count);
        }
        cmd.push(c);
        backslash_count = 0;
    }

    // Trailing backslashes precede the closing quote, so they are doubled.
    push_n(cmd, '\\', backslash_count * 2);
    cmd.push('"');
    Ok(())
}

fn push_n(cmd: &mut String, c: char, count: usize) {
    for _ in 0..count {
        cmd.push(c);
    }
}

fn requires_quoting(val: &str) -> bool {
    val.is_empty() || val.chars().any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'))
}

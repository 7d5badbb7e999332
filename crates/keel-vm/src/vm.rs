// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The stack interpreter.

use std::any::{Any, TypeId};
use std::ffi::c_void;
use std::io::Write;

use rustc_hash::FxHashMap;

use crate::compiler::compile;
use crate::dump::read_irep;
use crate::error::{Result, VmError};
use crate::irep::{Irep, OpCode};
use crate::value::Value;

/// A function callable from scripts.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value>;

/// Nesting limit for units executing inside one another.
pub const MAX_DEPTH: usize = 256;

/// How `STOP` behaves for the unit being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// A fresh top-level entry: `STOP` ends this entry only.
    TopLevel,
    /// A unit invoked as a callable: `STOP` halts the whole interpreter.
    Proc,
}

/// An interpreter instance.
///
/// Holds the global variable store, the root function table, the pending
/// exception slot and typed extension slots where embedders keep per-instance
/// state.
pub struct Vm {
    globals: FxHashMap<String, Value>,
    functions: FxHashMap<String, NativeFn>,
    exception: Option<VmError>,
    extensions: FxHashMap<TypeId, Box<dyn Any>>,
    output: Box<dyn Write>,
    halted: bool,
    depth: usize,
}

impl Vm {
    /// Creates an interpreter writing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// Creates an interpreter writing `puts`/`print` output to `output`.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        let mut vm = Self {
            globals: FxHashMap::default(),
            functions: FxHashMap::default(),
            exception: None,
            extensions: FxHashMap::default(),
            output,
            halted: false,
            depth: 0,
        };
        vm.define_function("puts", builtin_puts);
        vm.define_function("print", builtin_print);
        vm.define_function("p", builtin_p);
        vm.define_function("raise", builtin_raise);
        vm
    }

    /// Registers a function on the root namespace.
    pub fn define_function(&mut self, name: &str, function: NativeFn) {
        self.functions.insert(name.to_string(), function);
    }

    /// Whether a function with this name is registered.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Reads a global. Unset globals are nil.
    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Nil)
    }

    /// Writes a global.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Compiles `source` and runs it as a fresh top-level entry.
    pub fn eval(&mut self, source: &str, filename: &str) -> Result<Value> {
        let irep = compile(source, filename)?;
        self.run_toplevel(&irep)
    }

    /// Runs a unit as a top-level entry.
    pub fn run_toplevel(&mut self, irep: &Irep<'_>) -> Result<Value> {
        self.enter(irep, Mode::TopLevel)
    }

    /// Invokes a unit as a callable bound to the top-level scope.
    ///
    /// A `STOP` reached here halts the interpreter: every enclosing unit
    /// returns immediately.
    pub fn call_irep(&mut self, irep: &Irep<'_>) -> Result<Value> {
        self.enter(irep, Mode::Proc)
    }

    /// Decodes a bytecode image.
    ///
    /// A malformed image leaves a pending exception and yields `None`. An
    /// empty image yields `None` without one.
    pub fn read_irep<'a>(&mut self, data: &'a [u8]) -> Option<Irep<'a>> {
        if data.is_empty() {
            return None;
        }
        match read_irep(data) {
            Ok(irep) => Some(irep),
            Err(e) => {
                tracing::debug!("bytecode decode failed: {}", e);
                self.exception = Some(VmError::Decode(e));
                None
            }
        }
    }

    /// Whether an exception is pending.
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Records a pending exception.
    pub fn set_exception(&mut self, error: VmError) {
        self.exception = Some(error);
    }

    /// Takes the pending exception, clearing it.
    pub fn take_exception(&mut self) -> Option<VmError> {
        self.exception.take()
    }

    /// Whether the last outermost run was cut short by `STOP`.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Stores per-instance state of type `T`, returning any previous value.
    pub fn insert_extension<T: 'static>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Per-instance state of type `T`.
    pub fn extension<T: 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    /// Mutable per-instance state of type `T`.
    pub fn extension_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    /// Opaque handle passed to native extension entry points.
    pub fn as_handle(&mut self) -> *mut c_void {
        self as *mut Vm as *mut c_void
    }

    /// Recovers the interpreter from a handle produced by [`Vm::as_handle`].
    ///
    /// # Safety
    ///
    /// `handle` must come from `as_handle` on a live interpreter, and no other
    /// reference to that interpreter may be used while the result is alive.
    pub unsafe fn from_handle<'a>(handle: *mut c_void) -> &'a mut Vm {
        unsafe { &mut *(handle as *mut Vm) }
    }

    fn enter(&mut self, irep: &Irep<'_>, mode: Mode) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(VmError::raised("SystemStackError", "stack level too deep"));
        }
        if self.depth == 0 {
            self.halted = false;
        }
        self.depth += 1;
        let result = self.execute(irep, mode);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, irep: &Irep<'_>, mode: Mode) -> Result<Value> {
        let mut stack: Vec<Value> = Vec::new();

        for pc in 0..irep.ilen() {
            let instr = irep
                .instruction(pc)
                .ok_or_else(|| VmError::Fatal(format!("invalid instruction at {}", pc)))?;
            let pool = |index: u16| {
                irep.pool.get(index as usize).ok_or_else(|| {
                    VmError::Fatal(format!("pool index {} out of range at {}", index, pc))
                })
            };

            match instr.opcode {
                OpCode::Nop => {}
                OpCode::LoadNil => stack.push(Value::Nil),
                OpCode::LoadTrue => stack.push(Value::Bool(true)),
                OpCode::LoadFalse => stack.push(Value::Bool(false)),
                OpCode::LoadInt => stack.push(Value::Int(i64::from(instr.bx as i16))),
                OpCode::String => stack.push(Value::String(pool(instr.bx)?.clone())),
                OpCode::GetGlobal => stack.push(self.global(pool(instr.bx)?)),
                OpCode::SetGlobal => {
                    let value = stack.last().cloned().ok_or_else(|| underflow(pc))?;
                    self.set_global(pool(instr.bx)?, value);
                }
                OpCode::Array => {
                    let count = instr.bx as usize;
                    let start = stack.len().checked_sub(count).ok_or_else(|| underflow(pc))?;
                    let items = stack.split_off(start);
                    stack.push(Value::array(items));
                }
                OpCode::ArrayPush => {
                    let value = stack.pop().ok_or_else(|| underflow(pc))?;
                    let target = stack.pop().ok_or_else(|| underflow(pc))?;
                    match target.as_array() {
                        Some(items) => items.borrow_mut().push(value),
                        None => {
                            return Err(VmError::raised(
                                "NoMethodError",
                                format!("undefined method '<<' for {}", target.type_name()),
                            ));
                        }
                    }
                    stack.push(target);
                }
                OpCode::Send => {
                    let name = pool(instr.bx)?;
                    let argc = instr.a as usize;
                    let start = stack.len().checked_sub(argc).ok_or_else(|| underflow(pc))?;
                    let args = stack.split_off(start);
                    let function = self.functions.get(name.as_str()).copied().ok_or_else(|| {
                        VmError::raised(
                            "NoMethodError",
                            format!("undefined method '{}' for main", name),
                        )
                    })?;
                    let value = function(self, &args)?;
                    if self.halted {
                        return Ok(Value::Nil);
                    }
                    stack.push(value);
                }
                OpCode::Pop => {
                    stack.pop();
                }
                OpCode::Return => return Ok(stack.pop().unwrap_or(Value::Nil)),
                OpCode::Stop => {
                    if mode == Mode::Proc {
                        tracing::debug!("STOP reached inside a called unit, halting");
                        self.halted = true;
                        return Ok(Value::Nil);
                    }
                    return Ok(stack.pop().unwrap_or(Value::Nil));
                }
            }
        }

        Ok(stack.pop().unwrap_or(Value::Nil))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn underflow(pc: usize) -> VmError {
    VmError::Fatal(format!("stack underflow at instruction {}", pc))
}

fn write_out(vm: &mut Vm, text: &str) -> Result<()> {
    vm.output
        .write_all(text.as_bytes())
        .map_err(|e| VmError::raised("IOError", e.to_string()))
}

fn puts_lines(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            for item in items.borrow().iter() {
                puts_lines(item, out);
            }
        }
        other => {
            let text = other.to_string();
            out.push_str(&text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
    }
}

fn builtin_puts(vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    if args.is_empty() {
        out.push('\n');
    }
    for arg in args {
        puts_lines(arg, &mut out);
    }
    write_out(vm, &out)?;
    Ok(Value::Nil)
}

fn builtin_print(vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let out: String = args.iter().map(|a| a.to_string()).collect();
    write_out(vm, &out)?;
    Ok(Value::Nil)
}

fn builtin_p(vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.inspect());
        out.push('\n');
    }
    write_out(vm, &out)?;
    Ok(match args {
        [] => Value::Nil,
        [one] => one.clone(),
        many => Value::array(many.to_vec()),
    })
}

fn builtin_raise(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    match args {
        [] => Err(VmError::runtime("unhandled exception")),
        [message] => Err(VmError::runtime(message.to_string())),
        [class, message] => Err(VmError::raised(class.to_string(), message.to_string())),
        _ => Err(VmError::argument(format!(
            "wrong number of arguments (given {}, expected 0..2)",
            args.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::dump;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn vm_with_capture() -> (Vm, Capture) {
        let capture = Capture::default();
        (Vm::with_output(Box::new(capture.clone())), capture)
    }

    #[test]
    fn test_eval_globals_and_output() {
        let (mut vm, out) = vm_with_capture();
        let result = vm
            .eval("$list = [\"a\"]\n$list << \"b\"\nputs $list\n42", "t.rb")
            .unwrap();
        assert_eq!(result, Value::Int(42));
        assert_eq!(out.text(), "a\nb\n");
        assert_eq!(
            vm.global("$list"),
            Value::array(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn test_unknown_function_raises() {
        let mut vm = Vm::new();
        let err = vm.eval("frobnicate 1", "t.rb").unwrap_err();
        assert_eq!(err.class_name(), "NoMethodError");
    }

    #[test]
    fn test_raise_with_class() {
        let mut vm = Vm::new();
        let err = vm.eval("raise \"LoadError\", \"nope\"", "t.rb").unwrap_err();
        assert_eq!(err.class_name(), "LoadError");
        assert_eq!(err.to_string(), "nope (LoadError)");
    }

    #[test]
    fn test_stop_in_called_unit_halts_everything() {
        fn run_unit(vm: &mut Vm, _args: &[Value]) -> Result<Value> {
            let irep = compile("$inner = true", "unit.rb")?;
            vm.call_irep(&irep)
        }

        let (mut vm, _) = vm_with_capture();
        vm.define_function("run_unit", run_unit);
        vm.eval("run_unit\n$after = true", "main.rb").unwrap();
        assert_eq!(vm.global("$inner"), Value::Bool(true));
        assert!(vm.global("$after").is_nil());
        assert!(vm.is_halted());

        // the next outermost run starts fresh
        vm.eval("$again = 1", "main.rb").unwrap();
        assert_eq!(vm.global("$again"), Value::Int(1));
    }

    #[test]
    fn test_read_irep_records_exception() {
        let mut vm = Vm::new();
        assert!(vm.read_irep(&[]).is_none());
        assert!(!vm.has_exception());

        assert!(vm.read_irep(b"garbage that is long").is_none());
        assert!(matches!(vm.take_exception(), Some(VmError::Decode(_))));

        let image = dump(&compile("$x = 1", "t.rb").unwrap());
        let irep = vm.read_irep(&image).unwrap();
        vm.run_toplevel(&irep).unwrap();
        assert_eq!(vm.global("$x"), Value::Int(1));
    }

    #[test]
    fn test_deep_recursion_is_bounded() {
        fn recurse(vm: &mut Vm, _args: &[Value]) -> Result<Value> {
            vm.eval("recurse", "r.rb")
        }

        let mut vm = Vm::new();
        vm.define_function("recurse", recurse);
        let err = vm.eval("recurse", "r.rb").unwrap_err();
        assert_eq!(err.class_name(), "SystemStackError");
    }

    #[test]
    fn test_extensions_and_handles() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let mut vm = Vm::new();
        assert!(vm.insert_extension(Counter(1)).is_none());
        vm.extension_mut::<Counter>().unwrap().0 += 1;
        assert_eq!(vm.extension::<Counter>(), Some(&Counter(2)));

        let handle = vm.as_handle();
        let same = unsafe { Vm::from_handle(handle) };
        same.set_global("$h", Value::Int(7));
        assert_eq!(vm.global("$h"), Value::Int(7));
    }
}

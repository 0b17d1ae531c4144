//! Serialization of [`Module`]s to textual LLVM IR.
//!
//! Pointers are printed opaque (`ptr`); load/GEP instructions carry their
//! own element types, so the output is valid for LLVM 15+ toolchains.
//! Float constants are printed in hexadecimal bit form, which is exact
//! for every value.

use std::fmt::Write as _;

use super::{BlockId, CallConv, InstrKind, Instruction, Module, Ty, Value};

/// Renders the whole module as textual IR.
pub fn module_to_string(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; ModuleID = '{}'", module.name);
    let _ = writeln!(out, "source_filename = \"{}\"", module.name);
    let _ = writeln!(out);

    for global in &module.globals {
        if let Some(text) = &global.string {
            let _ = writeln!(
                out,
                "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
                quote_name(&global.name),
                text.len() + 1,
                escape_string(text)
            );
        } else if let Some(init) = &global.init {
            let _ = writeln!(
                out,
                "@{} = global {} {}",
                quote_name(&global.name),
                ty(&global.ty),
                value_body(init)
            );
        } else {
            let _ = writeln!(out, "@{} = external global {}", quote_name(&global.name), ty(&global.ty));
        }
    }
    if !module.globals.is_empty() {
        let _ = writeln!(out);
    }

    for (name, decl) in &module.declarations {
        let params: Vec<String> = decl.params.iter().map(ty).collect();
        let _ = writeln!(out, "declare {} @{}({})", ty(&decl.ret), quote_name(name), params.join(", "));
    }
    for intrinsic in used_intrinsics(module) {
        let _ = writeln!(out, "{intrinsic}");
    }
    if !module.declarations.is_empty() {
        let _ = writeln!(out);
    }

    for function in &module.functions {
        let params: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} %arg{}", ty(p), i))
            .collect();
        let _ = writeln!(
            out,
            "define {} {} @{}({}) {{",
            cc(function.call_conv),
            ty(&function.ret),
            quote_name(&function.name),
            params.join(", ")
        );
        for block in &function.blocks {
            let _ = writeln!(out, "{}:", block.label);
            for instr in &block.instrs {
                let _ = writeln!(out, "  {}", render_instr(function, instr));
            }
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }
    out
}

fn cc(call_conv: CallConv) -> &'static str {
    call_conv.keyword()
}

fn ty(t: &Ty) -> String {
    match t {
        Ty::Void => "void".to_string(),
        Ty::I1 => "i1".to_string(),
        Ty::I8 => "i8".to_string(),
        Ty::I16 => "i16".to_string(),
        Ty::I32 => "i32".to_string(),
        Ty::I64 => "i64".to_string(),
        Ty::F32 => "float".to_string(),
        Ty::F64 => "double".to_string(),
        Ty::Ptr(_) => "ptr".to_string(),
        Ty::Struct(members) => {
            let inner: Vec<String> = members.iter().map(ty).collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

/// `<ty> <value>` as used in operand position.
fn value(v: &Value) -> String {
    format!("{} {}", ty(&v.ty()), value_body(v))
}

/// Just the value spelling, without its type.
fn value_body(v: &Value) -> String {
    match v {
        Value::ConstInt { value, .. } => value.to_string(),
        Value::ConstFloat { value, .. } => format!("0x{:016X}", value.to_bits()),
        Value::NullPtr { .. } => "null".to_string(),
        Value::Zero { .. } => "zeroinitializer".to_string(),
        Value::Global { name, .. } => format!("@{}", quote_name(name)),
        Value::Arg { index, .. } => format!("%arg{index}"),
        Value::Instr { id, .. } => format!("%v{id}"),
    }
}

fn label(function: &super::Function, block: BlockId) -> String {
    format!("label %{}", function.blocks[block.index()].label)
}

fn render_instr(function: &super::Function, instr: &Instruction) -> String {
    let dest = instr
        .result
        .as_ref()
        .map(|(id, _)| format!("%v{id} = "))
        .unwrap_or_default();
    let body = match &instr.kind {
        InstrKind::Alloca { ty: t, count } => match count {
            Some(n) => format!("alloca {}, {}", ty(t), value(n)),
            None => format!("alloca {}", ty(t)),
        },
        InstrKind::Load { ty: t, ptr } => format!("load {}, {}", ty(t), value(ptr)),
        InstrKind::Store { value: v, ptr } => format!("store {}, {}", value(v), value(ptr)),
        InstrKind::Gep { base_ty, ptr, indices } => {
            let idx: Vec<String> = indices.iter().map(value).collect();
            format!("getelementptr {}, {}, {}", ty(base_ty), value(ptr), idx.join(", "))
        }
        InstrKind::Call { callee, args, ret } => {
            let rendered: Vec<String> = args.iter().map(value).collect();
            format!("call {} @{}({})", ty(ret), quote_name(callee), rendered.join(", "))
        }
        InstrKind::Arith { op, lhs, rhs } => {
            format!("{} {}, {}", op.keyword(), value(lhs), value_body(rhs))
        }
        InstrKind::ICmp { pred, lhs, rhs } => {
            format!("icmp {} {}, {}", pred.keyword(), value(lhs), value_body(rhs))
        }
        InstrKind::FCmp { pred, lhs, rhs } => {
            format!("fcmp {} {}, {}", pred.keyword(), value(lhs), value_body(rhs))
        }
        InstrKind::StackSave => "call ptr @llvm.stacksave.p0()".to_string(),
        InstrKind::StackRestore { saved } => {
            format!("call void @llvm.stackrestore.p0({})", value(saved))
        }
        InstrKind::Br { target } => format!("br {}", label(function, *target)),
        InstrKind::CondBr { cond, then_to, else_to } => format!(
            "br {}, {}, {}",
            value(cond),
            label(function, *then_to),
            label(function, *else_to)
        ),
        InstrKind::Ret { value: Some(v) } => format!("ret {}", value(v)),
        InstrKind::Ret { value: None } => "ret void".to_string(),
    };
    format!("{dest}{body}")
}

/// Declarations for the intrinsics actually used by the module.
fn used_intrinsics(module: &Module) -> Vec<&'static str> {
    let mut save = false;
    let mut restore = false;
    for function in &module.functions {
        for block in &function.blocks {
            for instr in &block.instrs {
                match instr.kind {
                    InstrKind::StackSave => save = true,
                    InstrKind::StackRestore { .. } => restore = true,
                    _ => {}
                }
            }
        }
    }
    let mut out = Vec::new();
    if save {
        out.push("declare ptr @llvm.stacksave.p0()");
    }
    if restore {
        out.push("declare void @llvm.stackrestore.p0(ptr)");
    }
    out
}

fn escape_string(text: &str) -> String {
    let mut out = String::new();
    for byte in text.bytes() {
        if byte.is_ascii_graphic() && byte != b'"' && byte != b'\\' {
            out.push(byte as char);
        } else if byte == b' ' {
            out.push(' ');
        } else {
            let _ = write!(out, "\\{byte:02X}");
        }
    }
    out
}

/// Symbol names containing characters outside LLVM's bare-name set are
/// quoted (slab-qualified names carry `::`).
fn quote_name(name: &str) -> String {
    let bare = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'));
    if bare {
        name.to_string()
    } else {
        format!("\"{name}\"")
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::super::{Builder, FnDecl, Function, Module};
    use super::*;

    #[test]
    fn renders_a_minimal_function() {
        let mut module = Module::new("demo.ll");
        module.functions.push(Function::new(
            "_tabi_main",
            vec![],
            Ty::I32,
            CallConv::host(),
        ));
        let mut b = Builder::at(&mut module, 0, BlockId(0));
        let entry = b.append_block("stack_alloc");
        b.set_insert_point(entry);
        let saved = b.stack_save();
        b.stack_restore(saved);
        b.ret(Value::const_i32(0));

        module.verify().expect("module verifies");
        let text = module_to_string(&module);
        assert!(text.contains("define"), "has a definition: {text}");
        assert!(text.contains("@_tabi_main"), "names the function: {text}");
        assert!(text.contains("ret i32 0"), "returns zero: {text}");
        assert!(text.contains("declare ptr @llvm.stacksave.p0()"), "declares intrinsic: {text}");
    }

    #[test]
    fn verify_rejects_unterminated_blocks() {
        let mut module = Module::new("bad.ll");
        module
            .functions
            .push(Function::new("f", vec![], Ty::Void, CallConv::host()));
        let mut b = Builder::at(&mut module, 0, BlockId(0));
        let entry = b.append_block("entry");
        b.set_insert_point(entry);
        let slot = b.alloca(&Ty::I32);
        b.store(Value::const_i32(1), slot);
        assert!(module.verify().is_err());
    }

    #[test]
    fn calls_render_with_argument_types() {
        let mut module = Module::new("call.ll");
        module
            .functions
            .push(Function::new("f", vec![], Ty::Void, CallConv::host()));
        let mut b = Builder::at(&mut module, 0, BlockId(0));
        let entry = b.append_block("entry");
        b.set_insert_point(entry);
        let decl = FnDecl {
            params: vec![Ty::I32],
            ret: Ty::I8.ptr_to(),
        };
        let p = b.call("core_alloc", &decl, smallvec![Value::const_i32(4)]).unwrap();
        b.store(Value::const_i32(42), p);
        b.ret_void();
        let text = module_to_string(&module);
        assert!(text.contains("call ptr @core_alloc(i32 4)"), "{text}");
        assert!(text.contains("declare ptr @core_alloc(i32)"), "{text}");
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::ir::insn::primitive_for_array_type;
use crate::ir::{
    CastInsn, ClassCode, ClassLocalVariableAnnotation, CodeFrame, CodeLabel, Constant, FieldOp,
    FrameElement, IincInsn, Insn, InsnList, InsnNode, InvokeOp, JumpOp, LocalVariable,
    LocalVariableRange, LookupSwitchInsn, MethodInsn, MultiANewArrayInsn, SimpleInsn,
    TableSwitchInsn, TryCatchBlock, TypeInsn, TypeOp, TypedInsn, TypedOp, UnknownAttribute,
    VarIndex, VarInsn, VarOp, VmType,
};
use crate::opcodes;
use crate::reader::annotation::{self, CodeTarget};
use crate::reader::{Bytes, ConstantPool, read_attributes};
use crate::types::{TypeDescriptor, TypeSignature};
use crate::Result;

const LOAD_STORE_TYPES: [VmType; 5] = [
    VmType::Int,
    VmType::Long,
    VmType::Float,
    VmType::Double,
    VmType::Reference,
];

const ARRAY_TYPES: [VmType; 8] = [
    VmType::Int,
    VmType::Long,
    VmType::Float,
    VmType::Double,
    VmType::Reference,
    VmType::Byte,
    VmType::Char,
    VmType::Short,
];

const JUMPS: [JumpOp; 16] = [
    JumpOp::IfEq,
    JumpOp::IfNe,
    JumpOp::IfLt,
    JumpOp::IfGe,
    JumpOp::IfGt,
    JumpOp::IfLe,
    JumpOp::IfICmpEq,
    JumpOp::IfICmpNe,
    JumpOp::IfICmpLt,
    JumpOp::IfICmpGe,
    JumpOp::IfICmpGt,
    JumpOp::IfICmpLe,
    JumpOp::IfACmpEq,
    JumpOp::IfACmpNe,
    JumpOp::Goto,
    JumpOp::Jsr,
];

/// Labels keyed by bytecode offset, created on first use.
#[derive(Default)]
struct Labels {
    by_offset: BTreeMap<u32, CodeLabel>,
}

impl Labels {
    fn at(&mut self, offset: u32) -> CodeLabel {
        self.by_offset.entry(offset).or_default().clone()
    }
}

/// Decode a `Code` attribute into a body owned by nobody yet.
pub(crate) fn read_code(
    data: &[u8],
    pool: &ConstantPool,
    member: (&str, &str),
    unknown: &mut Vec<UnknownAttribute>,
) -> Result<Arc<ClassCode>> {
    let mut input = Bytes::new(data);
    let max_stack = input.u16()?;
    let max_locals = input.u16()?;
    let code_length = input.u32()? as usize;
    let bytecode = input.take(code_length)?;

    let mut labels = Labels::default();
    let (mut nodes, offsets) = read_insns(bytecode, pool, &mut labels)?;
    let index_of: HashMap<u32, usize> = offsets
        .iter()
        .enumerate()
        .map(|(index, offset)| (*offset, index))
        .collect();
    let node_at = |offset: u32| -> Result<usize> {
        index_of
            .get(&offset)
            .copied()
            .ok_or_else(|| malformed_error!("offset {offset} is not an instruction boundary"))
    };

    let table_length = input.u16()?;
    let mut try_catch_blocks = Vec::with_capacity(table_length as usize);
    for _ in 0..table_length {
        let start = labels.at(u32::from(input.u16()?));
        let end = labels.at(u32::from(input.u16()?));
        let handler = labels.at(u32::from(input.u16()?));
        let catch_type = pool.optional_class(input.u16()?)?;
        try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
        });
    }

    let mut local_variables = Vec::new();
    let mut local_keys = Vec::new();
    let mut local_signatures = HashMap::new();
    let mut local_variable_annotations = Vec::new();
    for attribute in read_attributes(&mut input, pool)? {
        let mut body = Bytes::new(attribute.data);
        match attribute.name {
            "LineNumberTable" => {
                let count = body.u16()?;
                for _ in 0..count {
                    let start = u32::from(body.u16()?);
                    let line = body.u16()?;
                    nodes[node_at(start)?].set_line_number(i32::from(line))?;
                }
            }
            "LocalVariableTable" => {
                let count = body.u16()?;
                for _ in 0..count {
                    let (start, length, name, descriptor, index) = read_local_entry(&mut body, pool)?;
                    local_keys.push((start, length, index, name.to_string()));
                    local_variables.push(LocalVariable {
                        name: name.to_string(),
                        descriptor: TypeDescriptor::parse(descriptor)?,
                        signature: None,
                        start: labels.at(u32::from(start)),
                        end: labels.at(u32::from(start) + u32::from(length)),
                        index: VarIndex::new(u32::from(index))?,
                    });
                }
            }
            "LocalVariableTypeTable" => {
                let count = body.u16()?;
                for _ in 0..count {
                    let (start, length, name, signature, index) = read_local_entry(&mut body, pool)?;
                    local_signatures.insert(
                        (start, length, index, name.to_string()),
                        TypeSignature::parse(signature)?,
                    );
                }
            }
            "StackMapTable" => {
                for (offset, frame) in read_frames(&mut body, pool, &mut labels)? {
                    nodes[node_at(offset)?].frame = Some(frame);
                }
            }
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                let visible = attribute.name == "RuntimeVisibleTypeAnnotations";
                for (type_annotation, target) in annotation::read_code_type_annotations(&mut body, pool)? {
                    match target {
                        CodeTarget::Insn(offset) => {
                            let node = &mut nodes[node_at(offset)?];
                            if visible {
                                node.visible_annotations.push(type_annotation);
                            } else {
                                node.invisible_annotations.push(type_annotation);
                            }
                        }
                        CodeTarget::TryCatch(index) => {
                            let block = try_catch_blocks.get_mut(index as usize).ok_or_else(|| {
                                malformed_error!("exception table index {index} out of range")
                            })?;
                            if visible {
                                block.visible_annotations.push(type_annotation);
                            } else {
                                block.invisible_annotations.push(type_annotation);
                            }
                        }
                        CodeTarget::LocalVariable(entries) => {
                            let ranges = entries
                                .into_iter()
                                .map(|(start, length, index)| {
                                    Ok(LocalVariableRange {
                                        start: labels.at(u32::from(start)),
                                        end: labels.at(u32::from(start) + u32::from(length)),
                                        index: VarIndex::new(u32::from(index))?,
                                    })
                                })
                                .collect::<Result<Vec<_>>>()?;
                            local_variable_annotations.push(ClassLocalVariableAnnotation {
                                type_ref: type_annotation.type_ref,
                                type_path: type_annotation.type_path,
                                annotation: type_annotation.annotation,
                                visible,
                                ranges,
                            });
                        }
                    }
                }
            }
            other => unknown.push(unknown_code_attribute(other, member)),
        }
    }
    if !input.is_empty() {
        return Err(malformed_error!("trailing bytes after Code attributes"));
    }

    // LocalVariableTypeTable entries match LocalVariableTable ones by range, slot and name.
    for (variable, key) in local_variables.iter_mut().zip(&local_keys) {
        variable.signature = local_signatures.remove(key);
    }

    let mut end_labels = Vec::new();
    for (offset, label) in &labels.by_offset {
        if *offset as usize == bytecode.len() {
            end_labels.push(label);
        } else {
            nodes[node_at(*offset)?].add_label(label)?;
        }
    }
    let list = InsnList::from_nodes(nodes);
    for label in end_labels {
        list.bind_end_label(label)?;
    }

    let code = ClassCode::new(max_stack, max_locals);
    {
        let mut body = code.write();
        body.try_catch_blocks = try_catch_blocks;
        body.local_variables = local_variables;
        body.local_variable_annotations = local_variable_annotations;
    }
    code.attach_insns(list)?;
    Ok(code)
}

fn unknown_code_attribute(name: &str, member: (&str, &str)) -> UnknownAttribute {
    UnknownAttribute {
        name: name.to_string(),
        member: Some((member.0.to_string(), member.1.to_string())),
    }
}

fn read_local_entry<'a>(
    body: &mut Bytes<'_>,
    pool: &'a ConstantPool,
) -> Result<(u16, u16, &'a str, &'a str, u16)> {
    let start = body.u16()?;
    let length = body.u16()?;
    let name = pool.utf8(body.u16()?)?;
    let descriptor = pool.utf8(body.u16()?)?;
    let index = body.u16()?;
    Ok((start, length, name, descriptor, index))
}

fn read_insns(
    bytecode: &[u8],
    pool: &ConstantPool,
    labels: &mut Labels,
) -> Result<(Vec<InsnNode>, Vec<u32>)> {
    let mut input = Bytes::new(bytecode);
    let mut nodes = Vec::new();
    let mut offsets = Vec::new();
    while !input.is_empty() {
        let offset = input.pos() as u32;
        let insn = read_insn(&mut input, offset, pool, labels)?;
        nodes.push(InsnNode::new(insn));
        offsets.push(offset);
    }
    Ok((nodes, offsets))
}

fn read_insn(input: &mut Bytes<'_>, offset: u32, pool: &ConstantPool, labels: &mut Labels) -> Result<Insn> {
    let opcode = input.u8()?;
    let branch = |labels: &mut Labels, delta: i32| -> Result<CodeLabel> {
        let target = i64::from(offset) + i64::from(delta);
        u32::try_from(target)
            .map(|target| labels.at(target))
            .map_err(|_| malformed_error!("branch at {offset} jumps before the method start"))
    };
    Ok(match opcode {
        opcodes::NOP => Insn::Simple(SimpleInsn::Nop),
        opcodes::ACONST_NULL => Insn::Simple(SimpleInsn::AconstNull),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Insn::Constant(Constant::Int(i32::from(opcode) - i32::from(opcodes::ICONST_M1) - 1))
        }
        opcodes::LCONST_0..=opcodes::LCONST_1 => {
            Insn::Constant(Constant::Long(i64::from(opcode - opcodes::LCONST_0)))
        }
        opcodes::FCONST_0..=opcodes::FCONST_2 => {
            Insn::Constant(Constant::Float(f32::from(opcode - opcodes::FCONST_0)))
        }
        opcodes::DCONST_0..=opcodes::DCONST_1 => {
            Insn::Constant(Constant::Double(f64::from(opcode - opcodes::DCONST_0)))
        }
        opcodes::BIPUSH => Insn::Constant(Constant::Int(i32::from(input.i8()?))),
        opcodes::SIPUSH => Insn::Constant(Constant::Int(i32::from(input.i16()?))),
        opcodes::LDC => Insn::Constant(pool.constant(u16::from(input.u8()?))?),
        opcodes::LDC_W | opcodes::LDC2_W => Insn::Constant(pool.constant(input.u16()?)?),
        opcodes::ILOAD..=opcodes::ALOAD => {
            let ty = LOAD_STORE_TYPES[usize::from(opcode - opcodes::ILOAD)];
            Insn::Var(VarInsn::new(VarOp::Load, ty, u32::from(input.u8()?))?)
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            let ty = LOAD_STORE_TYPES[usize::from(relative / 4)];
            Insn::Var(VarInsn::new(VarOp::Load, ty, u32::from(relative % 4))?)
        }
        opcodes::IALOAD..=opcodes::SALOAD => Insn::Typed(TypedInsn::new(
            TypedOp::ArrayLoad,
            ARRAY_TYPES[usize::from(opcode - opcodes::IALOAD)],
        )?),
        opcodes::ISTORE..=opcodes::ASTORE => {
            let ty = LOAD_STORE_TYPES[usize::from(opcode - opcodes::ISTORE)];
            Insn::Var(VarInsn::new(VarOp::Store, ty, u32::from(input.u8()?))?)
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            let ty = LOAD_STORE_TYPES[usize::from(relative / 4)];
            Insn::Var(VarInsn::new(VarOp::Store, ty, u32::from(relative % 4))?)
        }
        opcodes::IASTORE..=opcodes::SASTORE => Insn::Typed(TypedInsn::new(
            TypedOp::ArrayStore,
            ARRAY_TYPES[usize::from(opcode - opcodes::IASTORE)],
        )?),
        opcodes::POP => Insn::Simple(SimpleInsn::Pop),
        opcodes::POP2 => Insn::Simple(SimpleInsn::Pop2),
        opcodes::DUP => Insn::Simple(SimpleInsn::Dup),
        opcodes::DUP_X1 => Insn::Simple(SimpleInsn::DupX1),
        opcodes::DUP_X2 => Insn::Simple(SimpleInsn::DupX2),
        opcodes::DUP2 => Insn::Simple(SimpleInsn::Dup2),
        opcodes::DUP2_X1 => Insn::Simple(SimpleInsn::Dup2X1),
        opcodes::DUP2_X2 => Insn::Simple(SimpleInsn::Dup2X2),
        opcodes::SWAP => Insn::Simple(SimpleInsn::Swap),
        opcodes::IADD..=opcodes::LXOR => Insn::Typed(arithmetic(opcode)?),
        opcodes::IINC => Insn::Iinc(IincInsn::new(
            u32::from(input.u8()?),
            i32::from(input.i8()?),
        )?),
        opcodes::I2L..=opcodes::I2S => Insn::Cast(conversion(opcode)?),
        opcodes::LCMP => Insn::Typed(TypedInsn::new(TypedOp::Compare, VmType::Long)?),
        opcodes::FCMPL => Insn::Typed(TypedInsn::new(TypedOp::CompareL, VmType::Float)?),
        opcodes::FCMPG => Insn::Typed(TypedInsn::new(TypedOp::CompareG, VmType::Float)?),
        opcodes::DCMPL => Insn::Typed(TypedInsn::new(TypedOp::CompareL, VmType::Double)?),
        opcodes::DCMPG => Insn::Typed(TypedInsn::new(TypedOp::CompareG, VmType::Double)?),
        opcodes::IFEQ..=opcodes::JSR => {
            let op = JUMPS[usize::from(opcode - opcodes::IFEQ)];
            let delta = i32::from(input.i16()?);
            Insn::Jump {
                op,
                target: branch(labels, delta)?,
            }
        }
        opcodes::RET => Insn::Ret(VarIndex::new(u32::from(input.u8()?))?),
        opcodes::TABLESWITCH => {
            skip_switch_padding(input)?;
            let default = branch(labels, input.i32()?)?;
            let min = input.i32()?;
            let max = input.i32()?;
            if max < min {
                return Err(malformed_error!("tableswitch at {offset} has max < min"));
            }
            let count = (i64::from(max) - i64::from(min) + 1) as usize;
            if count > input.remaining() / 4 {
                return Err(malformed_error!("tableswitch at {offset} overruns the code"));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch(labels, input.i32()?)?);
            }
            Insn::TableSwitch(TableSwitchInsn {
                min,
                max,
                default,
                labels: targets,
            })
        }
        opcodes::LOOKUPSWITCH => {
            skip_switch_padding(input)?;
            let default = branch(labels, input.i32()?)?;
            let count = input.i32()?;
            if count < 0 || count as usize > input.remaining() / 8 {
                return Err(malformed_error!("lookupswitch at {offset} has a bad pair count"));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = input.i32()?;
                pairs.push((key, branch(labels, input.i32()?)?));
            }
            Insn::LookupSwitch(LookupSwitchInsn { default, pairs })
        }
        opcodes::IRETURN..=opcodes::ARETURN => Insn::Typed(TypedInsn::new(
            TypedOp::Return,
            LOAD_STORE_TYPES[usize::from(opcode - opcodes::IRETURN)],
        )?),
        opcodes::RETURN => Insn::Simple(SimpleInsn::Return),
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let op = match opcode {
                opcodes::GETSTATIC => FieldOp::GetStatic,
                opcodes::PUTSTATIC => FieldOp::PutStatic,
                opcodes::GETFIELD => FieldOp::GetField,
                _ => FieldOp::PutField,
            };
            Insn::Field {
                op,
                field: pool.field(input.u16()?)?,
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let op = match opcode {
                opcodes::INVOKEVIRTUAL => InvokeOp::Virtual,
                opcodes::INVOKESPECIAL => InvokeOp::Special,
                opcodes::INVOKESTATIC => InvokeOp::Static,
                _ => InvokeOp::Interface,
            };
            let (method, is_interface) = pool.method(input.u16()?)?;
            if op == InvokeOp::Interface {
                // count and a zero byte
                input.skip(2)?;
            }
            Insn::Method(MethodInsn::new(op, method, is_interface)?)
        }
        opcodes::INVOKEDYNAMIC => {
            let index = input.u16()?;
            input.skip(2)?;
            Insn::InvokeDynamic(pool.invoke_dynamic(index)?)
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            let op = match opcode {
                opcodes::NEW => TypeOp::New,
                opcodes::ANEWARRAY => TypeOp::ANewArray,
                opcodes::CHECKCAST => TypeOp::CheckCast,
                _ => TypeOp::InstanceOf,
            };
            Insn::Type(TypeInsn::new(op, pool.class(input.u16()?)?)?)
        }
        opcodes::NEWARRAY => {
            let code = input.u8()?;
            let primitive = primitive_for_array_type(code)
                .ok_or_else(|| malformed_error!("bad newarray type {code} at {offset}"))?;
            Insn::NewArray(primitive)
        }
        opcodes::ARRAYLENGTH => Insn::Simple(SimpleInsn::ArrayLength),
        opcodes::ATHROW => Insn::Simple(SimpleInsn::AThrow),
        opcodes::MONITORENTER => Insn::Simple(SimpleInsn::MonitorEnter),
        opcodes::MONITOREXIT => Insn::Simple(SimpleInsn::MonitorExit),
        opcodes::WIDE => read_wide(input, offset)?,
        opcodes::MULTIANEWARRAY => {
            let class = pool.class(input.u16()?)?;
            let dimensions = input.u8()?;
            Insn::MultiANewArray(MultiANewArrayInsn::new(class, u32::from(dimensions))?)
        }
        opcodes::IFNULL | opcodes::IFNONNULL => {
            let op = if opcode == opcodes::IFNULL {
                JumpOp::IfNull
            } else {
                JumpOp::IfNonNull
            };
            let delta = i32::from(input.i16()?);
            Insn::Jump {
                op,
                target: branch(labels, delta)?,
            }
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let op = if opcode == opcodes::GOTO_W {
                JumpOp::Goto
            } else {
                JumpOp::Jsr
            };
            let delta = input.i32()?;
            Insn::Jump {
                op,
                target: branch(labels, delta)?,
            }
        }
        other => return Err(malformed_error!("unknown opcode {other:#04x} at {offset}")),
    })
}

fn read_wide(input: &mut Bytes<'_>, offset: u32) -> Result<Insn> {
    let opcode = input.u8()?;
    Ok(match opcode {
        opcodes::ILOAD..=opcodes::ALOAD => Insn::Var(VarInsn::new(
            VarOp::Load,
            LOAD_STORE_TYPES[usize::from(opcode - opcodes::ILOAD)],
            u32::from(input.u16()?),
        )?),
        opcodes::ISTORE..=opcodes::ASTORE => Insn::Var(VarInsn::new(
            VarOp::Store,
            LOAD_STORE_TYPES[usize::from(opcode - opcodes::ISTORE)],
            u32::from(input.u16()?),
        )?),
        opcodes::RET => Insn::Ret(VarIndex::new(u32::from(input.u16()?))?),
        opcodes::IINC => Insn::Iinc(IincInsn::new(
            u32::from(input.u16()?),
            i32::from(input.i16()?),
        )?),
        other => return Err(malformed_error!("wide cannot modify opcode {other:#04x} at {offset}")),
    })
}

/// Switch operands start at the next four-byte boundary of the code array.
fn skip_switch_padding(input: &mut Bytes<'_>) -> Result<()> {
    let padding = (4 - input.pos() % 4) % 4;
    input.skip(padding)
}

fn arithmetic(opcode: u8) -> Result<TypedInsn> {
    if opcode < opcodes::IADD + 24 {
        const OPS: [TypedOp; 6] = [
            TypedOp::Add,
            TypedOp::Sub,
            TypedOp::Mul,
            TypedOp::Div,
            TypedOp::Rem,
            TypedOp::Neg,
        ];
        let relative = usize::from(opcode - opcodes::IADD);
        TypedInsn::new(OPS[relative / 4], LOAD_STORE_TYPES[relative % 4])
    } else {
        const OPS: [TypedOp; 6] = [
            TypedOp::Shl,
            TypedOp::Shr,
            TypedOp::Ushr,
            TypedOp::And,
            TypedOp::Or,
            TypedOp::Xor,
        ];
        let relative = usize::from(opcode - opcodes::IADD - 24);
        TypedInsn::new(OPS[relative / 2], LOAD_STORE_TYPES[relative % 2])
    }
}

fn conversion(opcode: u8) -> Result<CastInsn> {
    use VmType::*;
    const CASTS: [(VmType, VmType); 15] = [
        (Int, Long),
        (Int, Float),
        (Int, Double),
        (Long, Int),
        (Long, Float),
        (Long, Double),
        (Float, Int),
        (Float, Long),
        (Float, Double),
        (Double, Int),
        (Double, Long),
        (Double, Float),
        (Int, Byte),
        (Int, Char),
        (Int, Short),
    ];
    let (from, to) = CASTS[usize::from(opcode - opcodes::I2L)];
    CastInsn::new(from, to)
}

fn read_frames(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
    labels: &mut Labels,
) -> Result<Vec<(u32, CodeFrame)>> {
    let count = input.u16()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let frame_type = input.u8()?;
        let (delta, frame) = match frame_type {
            0..=63 => (u32::from(frame_type), CodeFrame::Same),
            64..=127 => (
                u32::from(frame_type - 64),
                CodeFrame::Same1(read_frame_element(input, pool, labels)?),
            ),
            247 => {
                let delta = u32::from(input.u16()?);
                (delta, CodeFrame::Same1(read_frame_element(input, pool, labels)?))
            }
            248..=250 => (u32::from(input.u16()?), CodeFrame::chop(251 - frame_type)?),
            251 => (u32::from(input.u16()?), CodeFrame::Same),
            252..=254 => {
                let delta = u32::from(input.u16()?);
                let mut locals = Vec::new();
                for _ in 0..(frame_type - 251) {
                    locals.push(read_frame_element(input, pool, labels)?);
                }
                (delta, CodeFrame::append(locals)?)
            }
            255 => {
                let delta = u32::from(input.u16()?);
                let locals = read_frame_elements(input, pool, labels)?;
                let stack = read_frame_elements(input, pool, labels)?;
                (delta, CodeFrame::Full { locals, stack })
            }
            other => return Err(malformed_error!("reserved stack map frame type {other}")),
        };
        let offset = match previous {
            None => delta,
            Some(previous) => previous + delta + 1,
        };
        previous = Some(offset);
        frames.push((offset, frame));
    }
    Ok(frames)
}

fn read_frame_elements(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
    labels: &mut Labels,
) -> Result<Vec<FrameElement>> {
    let count = input.u16()?;
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        elements.push(read_frame_element(input, pool, labels)?);
    }
    Ok(elements)
}

fn read_frame_element(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
    labels: &mut Labels,
) -> Result<FrameElement> {
    Ok(match input.u8()? {
        0 => FrameElement::Top,
        1 => FrameElement::Integer,
        2 => FrameElement::Float,
        3 => FrameElement::Double,
        4 => FrameElement::Long,
        5 => FrameElement::Null,
        6 => FrameElement::UninitializedThis,
        7 => FrameElement::Object(pool.class(input.u16()?)?),
        8 => FrameElement::Uninitialized(labels.at(u32::from(input.u16()?))),
        other => return Err(malformed_error!("bad verification type tag {other}")),
    })
}

#[cfg(test)]
mod tests {
    use crate::ir::access;
    use crate::ir::{CodeFrame, FrameElement, Insn, TypedOp, VmType};
    use crate::reader::fixture::ClassBuilder;
    use crate::reader::read_class;

    #[test]
    fn reads_switch_frames_and_debug_tables() {
        let mut builder = ClassBuilder::new("a/S", Some("java/lang/Object"));
        let string = builder.class("java/lang/String");
        // 0: iload_0; 1: tableswitch (pad to 4) default -> 20, 0..0 -> 20; 20: iconst_0; 21: ireturn
        let mut code = vec![0x1a, 0xaa, 0, 0];
        code.extend(19i32.to_be_bytes());
        code.extend(0i32.to_be_bytes());
        code.extend(0i32.to_be_bytes());
        code.extend(19i32.to_be_bytes());
        code.extend([0x03, 0xac]);
        assert_eq!(code.len(), 22);

        let mut lines = vec![0, 1];
        lines.extend(20u16.to_be_bytes());
        lines.extend(7u16.to_be_bytes());

        let mut frames = vec![0, 1, 255];
        frames.extend(20u16.to_be_bytes());
        frames.extend([0, 1, 7]);
        frames.extend(string.to_be_bytes());
        frames.extend([0, 0]);

        let name = builder.utf8("i");
        let descriptor = builder.utf8("I");
        let mut locals = vec![0, 1, 0, 0];
        locals.extend(22u16.to_be_bytes());
        locals.extend(name.to_be_bytes());
        locals.extend(descriptor.to_be_bytes());
        locals.extend([0, 0]);

        let body = builder.code(
            1,
            1,
            &code,
            &[],
            vec![
                ("LineNumberTable", lines),
                ("StackMapTable", frames),
                ("LocalVariableTable", locals),
                ("Vendor", vec![9]),
            ],
        );
        builder.method(access::STATIC, "pick", "(I)I", vec![("Code", body)]);

        let class = read_class(&builder.build()).expect("read class");
        assert_eq!(class.unknown_attributes.len(), 1);
        assert_eq!(
            class.unknown_attributes[0].member,
            Some(("pick".to_string(), "(I)I".to_string()))
        );
        let code = class.methods[0].code().expect("code").clone();
        let list = code.insns().expect("insns");
        let nodes = list.read();
        assert_eq!(nodes.len(), 4);
        let Insn::TableSwitch(switch) = &nodes[1].insn else {
            panic!("expected tableswitch");
        };
        assert_eq!(switch.default.target(), Some(nodes[2].id()));
        assert_eq!(switch.labels[0].target(), Some(nodes[2].id()));
        assert_eq!(nodes[2].line_number(), Some(7));
        assert_eq!(
            nodes[2].frame,
            Some(CodeFrame::Full {
                locals: vec![FrameElement::Object(crate::reference::ClassReference::new(
                    "java/lang/String"
                ))],
                stack: Vec::new(),
            })
        );
        let Insn::Typed(ret) = &nodes[3].insn else {
            panic!("expected ireturn");
        };
        assert_eq!((ret.op(), ret.ty()), (TypedOp::Return, VmType::Int));

        let body = code.read();
        let local = &body.local_variables[0];
        assert_eq!(local.name, "i");
        assert_eq!(local.start.target(), Some(nodes[0].id()));
        assert_eq!(list.end_labels(), vec![local.end.clone()]);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut builder = ClassBuilder::new("a/B", Some("java/lang/Object"));
        let body = builder.code(0, 0, &[0xfe], &[], Vec::new());
        builder.method(access::STATIC, "bad", "()V", vec![("Code", body)]);
        assert!(read_class(&builder.build()).is_err());
    }
}

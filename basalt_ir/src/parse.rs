extern crate nom;
extern crate ordered_float;

use std::cell::RefCell;
use std::collections::HashMap;

use crate::*;

/*
 * Top level parse function.
 */
pub fn parse(ir_text: &str) -> Result<Module, ()> {
    parse_module(ir_text, Context::default())
        .map(|x| x.1)
        .map_err(|_| ())
}

/*
 * This is a context sensitive parser. We parse directly into the graph data
 * structures inside ir::Module, so this is where interning happens. Constants
 * are interned at the module level; variable and block names are interned per
 * function, with IDs assigned in increasing order of first mention. Since a
 * branch may mention a block before its label appears, parsed blocks get
 * fixed up into ID order at the end of each function.
 */
#[derive(Default)]
struct Context {
    interned_constants: HashMap<Constant, ConstantID>,
}

impl Context {
    fn get_constant_id(&mut self, constant: Constant) -> ConstantID {
        if let Some(id) = self.interned_constants.get(&constant) {
            *id
        } else {
            let id = ConstantID::new(self.interned_constants.len());
            self.interned_constants.insert(constant, id);
            id
        }
    }
}

#[derive(Default)]
struct FunctionContext<'a> {
    var_ids: HashMap<&'a str, VarID>,
    var_order: Vec<&'a str>,
    block_ids: HashMap<&'a str, BlockID>,
}

impl<'a> FunctionContext<'a> {
    fn get_var_id(&mut self, name: &'a str) -> VarID {
        if let Some(id) = self.var_ids.get(name) {
            *id
        } else {
            let id = VarID::new(self.var_ids.len());
            self.var_ids.insert(name, id);
            self.var_order.push(name);
            id
        }
    }

    fn get_block_id(&mut self, name: &'a str) -> BlockID {
        if let Some(id) = self.block_ids.get(name) {
            *id
        } else {
            let id = BlockID::new(self.block_ids.len());
            self.block_ids.insert(name, id);
            id
        }
    }
}

/*
 * A module is just a file with a list of functions.
 */
fn parse_module<'a>(ir_text: &'a str, context: Context) -> nom::IResult<&'a str, Module> {
    let context = RefCell::new(context);

    // If there is any text left after successfully parsing some functions,
    // treat that as an error.
    let (rest, functions) = nom::combinator::all_consuming(nom::sequence::terminated(
        nom::multi::many0(|x| parse_function(x, &context)),
        nom::character::complete::multispace0,
    ))(ir_text)?;
    let context = context.into_inner();

    // Assemble the flat list of interned constants, now that every ID has
    // been handed out.
    let mut constants = vec![Constant::Integer32(0); context.interned_constants.len()];
    for (constant, id) in context.interned_constants {
        constants[id.idx()] = constant;
    }

    Ok((rest, Module { functions, constants }))
}

fn parse_function<'a>(
    ir_text: &'a str,
    context: &RefCell<Context>,
) -> nom::IResult<&'a str, Function> {
    let function_context = RefCell::new(FunctionContext::default());

    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::bytes::complete::tag("fn")(ir_text)?;
    let (ir_text, _) = nom::character::complete::multispace1(ir_text)?;
    let (ir_text, name) = parse_identifier(ir_text)?;
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char('(')(ir_text)?;
    let (ir_text, params) = nom::multi::separated_list0(
        nom::character::complete::char(','),
        nom::sequence::delimited(
            nom::character::complete::multispace0,
            parse_identifier,
            nom::character::complete::multispace0,
        ),
    )(ir_text)?;
    let (ir_text, _) = nom::character::complete::char(')')(ir_text)?;
    for param in params.iter() {
        function_context.borrow_mut().get_var_id(*param);
    }

    let (ir_text, blocks) =
        nom::multi::many1(|x| parse_block(x, context, &function_context))(ir_text)?;

    // Blocks, as returned by parsing, are in parse order, which may differ
    // from the order dictated by BlockIDs in the block name intern map.
    let function_context = function_context.into_inner();
    let num_blocks = function_context.block_ids.len();
    let mut fixed_blocks = vec![
        BasicBlock {
            name: String::new(),
            insts: vec![],
            term: Terminator::Return { value: None },
        };
        num_blocks
    ];
    let mut defined = vec![false; num_blocks];
    for (id, block) in blocks {
        // A label defined twice is an error.
        if defined[id.idx()] {
            return parse_error(ir_text);
        }
        defined[id.idx()] = true;
        fixed_blocks[id.idx()] = block;
    }

    // A block mentioned by a branch but never defined is also an error.
    if !defined.into_iter().all(|x| x) {
        return parse_error(ir_text);
    }

    let var_names = function_context
        .var_order
        .iter()
        .map(|name| String::from(*name))
        .collect();
    Ok((
        ir_text,
        Function {
            name: String::from(name),
            num_params: params.len(),
            var_names,
            blocks: fixed_blocks,
        },
    ))
}

fn parse_block<'a>(
    ir_text: &'a str,
    context: &RefCell<Context>,
    function_context: &RefCell<FunctionContext<'a>>,
) -> nom::IResult<&'a str, (BlockID, BasicBlock)> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, name) = parse_identifier(ir_text)?;
    let (ir_text, _) = nom::character::complete::char(':')(ir_text)?;
    let id = function_context.borrow_mut().get_block_id(name);

    let (ir_text, (insts, term)) = nom::multi::many_till(
        |x| parse_instruction(x, context, function_context),
        |x| parse_terminator(x, function_context),
    )(ir_text)?;

    Ok((
        ir_text,
        (
            id,
            BasicBlock {
                name: String::from(name),
                insts,
                term,
            },
        ),
    ))
}

fn parse_instruction<'a>(
    ir_text: &'a str,
    context: &RefCell<Context>,
    function_context: &RefCell<FunctionContext<'a>>,
) -> nom::IResult<&'a str, Instruction> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, dst) = nom::combinator::opt(nom::sequence::terminated(
        parse_identifier,
        nom::sequence::tuple((
            nom::character::complete::multispace0,
            nom::character::complete::char('='),
            nom::character::complete::multispace0,
        )),
    ))(ir_text)?;
    let (ir_text, op) = parse_identifier(ir_text)?;
    let (ir_text, flags) = nom::multi::many0(nom::sequence::preceded(
        nom::character::complete::char('.'),
        parse_identifier,
    ))(ir_text)?;
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char('(')(ir_text)?;

    // Flags are only legal on loads and stores.
    let mut volatile = false;
    let mut atomic = false;
    for flag in flags {
        match flag {
            "volatile" => volatile = true,
            "atomic" if op == "store" => atomic = true,
            _ => return parse_error(ir_text),
        }
    }
    if volatile && op != "load" && op != "store" {
        return parse_error(ir_text);
    }

    let dst = dst.map(|name| function_context.borrow_mut().get_var_id(name));
    let (ir_text, inst) = match op {
        "slot" => {
            let (ir_text, size) = parse_u64(ir_text)?;
            let dst = match dst {
                Some(dst) => dst,
                None => return parse_error(ir_text),
            };
            (ir_text, Instruction::Slot { dst, size })
        }
        "address" => {
            let (ir_text, base) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, offset) = parse_u64(ir_text)?;
            let dst = match dst {
                Some(dst) => dst,
                None => return parse_error(ir_text),
            };
            (ir_text, Instruction::Address { dst, base, offset })
        }
        "constant" => {
            let (ir_text, cons) = parse_constant(ir_text, context)?;
            let dst = match dst {
                Some(dst) => dst,
                None => return parse_error(ir_text),
            };
            (ir_text, Instruction::Constant { dst, cons })
        }
        "add" | "sub" | "mul" | "div" => {
            let (ir_text, left) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, right) = parse_var(ir_text, function_context)?;
            let dst = match dst {
                Some(dst) => dst,
                None => return parse_error(ir_text),
            };
            let op = match op {
                "add" => BinaryOperator::Add,
                "sub" => BinaryOperator::Sub,
                "mul" => BinaryOperator::Mul,
                _ => BinaryOperator::Div,
            };
            (
                ir_text,
                Instruction::Binary {
                    dst,
                    left,
                    right,
                    op,
                },
            )
        }
        "load" => {
            let (ir_text, ptr) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, size) = parse_u64(ir_text)?;
            let dst = match dst {
                Some(dst) => dst,
                None => return parse_error(ir_text),
            };
            (
                ir_text,
                Instruction::Load {
                    dst,
                    ptr,
                    size,
                    volatile,
                },
            )
        }
        "store" => {
            // Stores produce no value.
            if dst.is_some() {
                return parse_error(ir_text);
            }
            let (ir_text, ptr) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, value) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, size) = parse_u64(ir_text)?;
            (
                ir_text,
                Instruction::Store {
                    ptr,
                    value,
                    size,
                    volatile,
                    atomic,
                },
            )
        }
        "call" => {
            let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
            let (ir_text, callee) = parse_identifier(ir_text)?;
            let (ir_text, args) = nom::multi::many0(nom::sequence::preceded(parse_comma, |x| {
                parse_var(x, function_context)
            }))(ir_text)?;
            (
                ir_text,
                Instruction::Call {
                    dst,
                    callee: String::from(callee),
                    args: args.into_boxed_slice(),
                },
            )
        }
        _ => return parse_error(ir_text),
    };

    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char(')')(ir_text)?;
    Ok((ir_text, inst))
}

fn parse_terminator<'a>(
    ir_text: &'a str,
    function_context: &RefCell<FunctionContext<'a>>,
) -> nom::IResult<&'a str, Terminator> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, op) = parse_identifier(ir_text)?;
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char('(')(ir_text)?;
    let (ir_text, term) = match op {
        "jmp" => {
            let (ir_text, target) = parse_block_ref(ir_text, function_context)?;
            (ir_text, Terminator::Jump { target })
        }
        "br" => {
            let (ir_text, cond) = parse_var(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, true_target) = parse_block_ref(ir_text, function_context)?;
            let (ir_text, _) = parse_comma(ir_text)?;
            let (ir_text, false_target) = parse_block_ref(ir_text, function_context)?;
            (
                ir_text,
                Terminator::Branch {
                    cond,
                    true_target,
                    false_target,
                },
            )
        }
        "ret" => {
            let (ir_text, value) =
                nom::combinator::opt(|x| parse_var(x, function_context))(ir_text)?;
            (ir_text, Terminator::Return { value })
        }
        _ => return parse_error(ir_text),
    };
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char(')')(ir_text)?;
    Ok((ir_text, term))
}

fn parse_constant<'a>(
    ir_text: &'a str,
    context: &RefCell<Context>,
) -> nom::IResult<&'a str, ConstantID> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, ty) = parse_identifier(ir_text)?;
    let (ir_text, _) = parse_comma(ir_text)?;
    let (ir_text, constant) = match ty {
        "i32" => {
            let (ir_text, x) = parse_i64(ir_text)?;
            (ir_text, Constant::Integer32(x as i32))
        }
        "i64" => {
            let (ir_text, x) = parse_i64(ir_text)?;
            (ir_text, Constant::Integer64(x))
        }
        "f32" => {
            let (ir_text, x) = parse_f64(ir_text)?;
            (
                ir_text,
                Constant::Float32(ordered_float::OrderedFloat(x as f32)),
            )
        }
        "f64" => {
            let (ir_text, x) = parse_f64(ir_text)?;
            (ir_text, Constant::Float64(ordered_float::OrderedFloat(x)))
        }
        _ => return parse_error(ir_text),
    };
    Ok((ir_text, context.borrow_mut().get_constant_id(constant)))
}

fn parse_identifier<'a>(ir_text: &'a str) -> nom::IResult<&'a str, &'a str> {
    nom::combinator::verify(
        nom::bytes::complete::take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        |s: &str| !s.chars().next().unwrap().is_numeric(),
    )(ir_text)
}

fn parse_var<'a>(
    ir_text: &'a str,
    function_context: &RefCell<FunctionContext<'a>>,
) -> nom::IResult<&'a str, VarID> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, name) = parse_identifier(ir_text)?;
    Ok((ir_text, function_context.borrow_mut().get_var_id(name)))
}

fn parse_block_ref<'a>(
    ir_text: &'a str,
    function_context: &RefCell<FunctionContext<'a>>,
) -> nom::IResult<&'a str, BlockID> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, name) = parse_identifier(ir_text)?;
    Ok((ir_text, function_context.borrow_mut().get_block_id(name)))
}

fn parse_comma<'a>(ir_text: &'a str) -> nom::IResult<&'a str, ()> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, _) = nom::character::complete::char(',')(ir_text)?;
    Ok((ir_text, ()))
}

fn parse_u64<'a>(ir_text: &'a str) -> nom::IResult<&'a str, u64> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, digits) = nom::character::complete::digit1(ir_text)?;
    match digits.parse() {
        Ok(x) => Ok((ir_text, x)),
        Err(_) => parse_error(ir_text),
    }
}

fn parse_i64<'a>(ir_text: &'a str) -> nom::IResult<&'a str, i64> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, text) = nom::combinator::recognize(nom::sequence::pair(
        nom::combinator::opt(nom::character::complete::char('-')),
        nom::character::complete::digit1,
    ))(ir_text)?;
    match text.parse() {
        Ok(x) => Ok((ir_text, x)),
        Err(_) => parse_error(ir_text),
    }
}

fn parse_f64<'a>(ir_text: &'a str) -> nom::IResult<&'a str, f64> {
    let (ir_text, _) = nom::character::complete::multispace0(ir_text)?;
    let (ir_text, text) = nom::number::complete::recognize_float(ir_text)?;
    match text.parse() {
        Ok(x) => Ok((ir_text, x)),
        Err(_) => parse_error(ir_text),
    }
}

fn parse_error<'a, T>(ir_text: &'a str) -> nom::IResult<&'a str, T> {
    Err(nom::Err::Error(nom::error::Error::new(
        ir_text,
        nom::error::ErrorKind::Verify,
    )))
}

use std::fmt;
use std::sync::Arc;

use crate::compiler::ast::CompareOp;
use crate::value::Value;

#[cfg(test)]
use similar_asserts::assert_eq;

/// This loop has the loop var.
pub const LOOP_FLAG_WITH_LOOP_VAR: u8 = 1;

/// This loop is recursive.
pub const LOOP_FLAG_RECURSIVE: u8 = 2;

/// The macro uses the `caller` variable.
pub const MACRO_CALLER: u8 = 1;

/// The macro uses the `varargs` variable.
pub const MACRO_VARARGS: u8 = 2;

/// The macro uses the `kwargs` variable.
pub const MACRO_KWARGS: u8 = 4;

/// Compact owned string as used by the instructions.
///
/// Instructions are fully owned so that compiled templates can be cached
/// and evicted independently of the source they were compiled from.
pub type Str = Arc<str>;

/// Controls what the capturing of output does.
#[derive(Debug, Copy, Clone)]
pub enum CaptureMode {
    /// Captures the output into a value.
    Capture,
    /// Throws the captured output away.
    Discard,
}

/// The data carried by a trans instruction.
#[derive(Debug, Clone)]
pub struct TransData {
    pub singular: Str,
    pub plural: Option<Str>,
    pub count_name: Option<Str>,
}

/// The data carried by a macro building instruction.
#[derive(Debug, Clone)]
pub struct MacroData {
    pub name: Str,
    /// The names of the declared arguments.
    pub args: Box<[Str]>,
    /// Instruction offset of the macro body.
    pub offset: usize,
    /// Which of the special variables the body references.
    pub flags: u8,
}

/// Represents an instruction for the VM.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Emits raw source.
    EmitRaw(Str),

    /// Emit the stack top as output.
    Emit,

    /// Stores a variable (only possible in for loops).
    StoreLocal(Str),

    /// Stores the top value on an attribute of the value below it.
    SetAttr(Str),

    /// Load a variable.
    Lookup(Str),

    /// Looks up an attribute.
    GetAttr(Str),

    /// Looks up an item.
    GetItem,

    /// Performs a slice operation.
    Slice,

    /// Loads a constant value.
    LoadConst(Value),

    /// Builds a map of the last n pairs on the stack.
    BuildMap(usize),

    /// Builds a kwargs map of the last n pairs on the stack.
    BuildKwargs(usize),

    /// Builds a list of the last n values on the stack.
    BuildList(usize),

    /// Unpacks a list into N stack items.
    UnpackList(usize),

    /// Appends to the list.
    ListAppend,

    /// Pops a sequence and extends the list below it.
    ListExtend,

    /// Pops a map and merges it into the map below it, keeping the kind
    /// of the lower map.
    MapExtend,

    /// Add the top two values.
    Add,

    /// Subtract the top two values.
    Sub,

    /// Multiply the top two values.
    Mul,

    /// Divide the top two values.
    Div,

    /// Integer divide the top two values as "integer".
    ///
    /// Note that this uses an euclidean division to match the rem
    /// implementation.
    IntDiv,

    /// Calculate the remainder of the top two values.
    Rem,

    /// x to the power of y.
    Pow,

    /// Negates the value.
    Neg,

    /// Unary not.
    Not,

    /// String concatenation operator.
    StringConcat,

    /// Performs a chained comparison.
    ///
    /// Pops `ops.len() + 1` operands from the stack and compares them
    /// pairwise, pushing a single boolean.
    Compare(Box<[CompareOp]>),

    /// Apply a filter.
    ApplyFilter(Str, usize),

    /// Perform a test.
    PerformTest(Str, usize),

    /// Starts a loop.
    ///
    /// The argument are loop flags.
    PushLoop(u8),

    /// Starts a with block.
    PushWith,

    /// Does a single loop iteration.
    ///
    /// The argument is the jump target for when the loop ends and must
    /// point to a `PopFrame` instruction.
    Iterate(usize),

    /// Pops the topmost frame.
    PopFrame,

    /// Jump to a specific instruction.
    Jump(usize),

    /// Jump if the stack top evaluates to false.
    JumpIfFalse(usize),

    /// Jump if the stack top evaluates to false or pops the value.
    JumpIfFalseOrPop(usize),

    /// Jump if the stack top evaluates to true or pops the value.
    JumpIfTrueOrPop(usize),

    /// Call into a block.
    CallBlock(Str),

    /// Loads the blocks of a parent template ("extends").
    LoadBlocks,

    /// Renders the parent template.  Must be the final instruction of a
    /// template that contains an extends tag.
    RenderParent,

    /// Includes another template.  (ignore_missing, with_context)
    Include(bool, bool),

    /// Renders another template as a module and pushes it.  The argument
    /// controls whether the current context is passed along.
    LoadModule(bool),

    /// Sets the auto escape flag to the current value.
    PushAutoEscape,

    /// Resets the auto escape flag to the previous value.
    PopAutoEscape,

    /// Begins capturing of output.
    BeginCapture(CaptureMode),

    /// Ends capturing of output.
    EndCapture,

    /// Calls a global function.
    ///
    /// `None` as argument count indicates the spread form where the
    /// positional arguments are passed as a list and the keyword
    /// arguments as a map on the stack.
    CallFunction(Str, Option<usize>),

    /// Calls a method.
    CallMethod(Str, Option<usize>),

    /// Calls an object.
    CallObject(Option<usize>),

    /// Duplicates the top item.
    DupTop,

    /// Discards the top item.
    DiscardTop,

    /// A fast super instruction without intermediate capturing.
    FastSuper,

    /// A fast loop recurse instruction without intermediate capturing.
    FastRecurse,

    /// Builds a macro on the stack.  Pops the closure and the defaults
    /// list.
    BuildMacro(Box<MacroData>),

    /// Emits a translated message.  Pops the map of bound variables.
    Trans(Box<TransData>),

    /// Breaks from the interpreter loop (exits a function).
    Return,
}

#[derive(Copy, Clone)]
struct LineInfo {
    first_instruction: u32,
    line: u32,
}

/// Wrapper around instructions to help with location management.
#[derive(Clone)]
pub struct Instructions {
    pub(crate) instructions: Vec<Instruction>,
    line_infos: Vec<LineInfo>,
    name: Str,
    source: Arc<str>,
    /// set for block instructions that must be overridden by an
    /// extending template.
    pub(crate) required_block: bool,
}

impl Instructions {
    /// Creates a new instructions object.
    pub fn new(name: Str, source: Arc<str>) -> Instructions {
        Instructions {
            instructions: Vec::with_capacity(128),
            line_infos: Vec::with_capacity(32),
            name,
            source,
            required_block: false,
        }
    }

    /// Returns the name of the template.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the source reference.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn name_shared(&self) -> Str {
        self.name.clone()
    }

    pub(crate) fn source_shared(&self) -> Arc<str> {
        self.source.clone()
    }

    /// Returns an instruction by index.
    #[inline(always)]
    pub fn get(&self, idx: usize) -> Option<&Instruction> {
        self.instructions.get(idx)
    }

    /// Returns an instruction by index mutably.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(idx)
    }

    /// Adds a new instruction.
    pub fn add(&mut self, instr: Instruction) -> usize {
        let rv = self.instructions.len();
        self.instructions.push(instr);
        rv
    }

    /// Adds a new instruction with a line number.
    pub fn add_with_line(&mut self, instr: Instruction, line: usize) -> usize {
        let rv = self.add(instr);
        let same_loc = self
            .line_infos
            .last()
            .map_or(false, |last_loc| last_loc.line as usize == line);
        if !same_loc {
            self.line_infos.push(LineInfo {
                first_instruction: rv as u32,
                line: line as u32,
            });
        }
        rv
    }

    /// Looks up the line for an instruction.
    pub fn get_line(&self, idx: usize) -> Option<usize> {
        let loc = match self
            .line_infos
            .binary_search_by_key(&idx, |x| x.first_instruction as usize)
        {
            Ok(idx) => &self.line_infos[idx],
            Err(0) => return None,
            Err(idx) => &self.line_infos[idx - 1],
        };
        Some(loc.line as usize)
    }

    /// Returns the number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Do we have any instructions?
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct InstructionWrapper<'a>(usize, &'a Instruction, Option<usize>);

        impl fmt::Debug for InstructionWrapper<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                ok!(write!(f, "{:>05} | {:?}", self.0, self.1));
                if let Some(line) = self.2 {
                    ok!(write!(f, "  [line {line}]"));
                }
                Ok(())
            }
        }

        let mut list = f.debug_list();
        let mut last_line = None;
        for (idx, instr) in self.instructions.iter().enumerate() {
            let line = self.get_line(idx);
            list.entry(&InstructionWrapper(
                idx,
                instr,
                if line != last_line { line } else { None },
            ));
            last_line = line;
        }
        list.finish()
    }
}

/// An empty instruction set, useful for testing.
pub(crate) fn empty_instructions() -> Arc<Instructions> {
    Arc::new(Instructions::new("<unknown>".into(), "".into()))
}

#[test]
fn test_line_info() {
    let mut instr = Instructions::new("test".into(), "".into());
    instr.add_with_line(Instruction::Emit, 1);
    instr.add_with_line(Instruction::Emit, 1);
    instr.add_with_line(Instruction::Emit, 2);
    instr.add_with_line(Instruction::Emit, 4);
    assert_eq!(instr.get_line(0), Some(1));
    assert_eq!(instr.get_line(1), Some(1));
    assert_eq!(instr.get_line(2), Some(2));
    assert_eq!(instr.get_line(3), Some(4));
}

#[test]
fn test_sizes() {
    // instruction size creeps up fast if variants grow; keep the common
    // case boxed.
    assert!(std::mem::size_of::<Instruction>() <= 40);
}

use std::io::Write;

use crate::diagnostics::TranslateError;

/// The finished output of one translation unit. Emitting never changes it,
/// so each mode may be written any number of times.
#[derive(Debug, Clone)]
pub struct Artifact {
    ir: String,
    asm: String,
    object: Vec<u8>,
}

impl Artifact {
    pub(crate) fn new(ir: String, asm: String, object: Vec<u8>) -> Self {
        Self { ir, asm, object }
    }

    pub fn ir(&self) -> &str {
        &self.ir
    }

    pub fn asm(&self) -> &str {
        &self.asm
    }

    pub fn object(&self) -> &[u8] {
        &self.object
    }

    /// Cranelift IR text of every function, as defined in the module.
    pub fn emit_ir(&self, sink: &mut impl Write) -> Result<(), TranslateError> {
        sink.write_all(self.ir.as_bytes())?;
        Ok(())
    }

    /// The relocatable object file.
    pub fn emit_obj(&self, sink: &mut impl Write) -> Result<(), TranslateError> {
        sink.write_all(&self.object)?;
        Ok(())
    }

    /// Target assembly, one labelled listing per function.
    pub fn emit_asm(&self, sink: &mut impl Write) -> Result<(), TranslateError> {
        sink.write_all(self.asm.as_bytes())?;
        Ok(())
    }
}

//! Tabla de mnemónicos PASM2.

use super::{Effects, EncodeError, Encoding, Schema};

/// Instrucciones de un solo operando `D`: `1101011 CZL DDDDDDDDD sub`.
const fn d_only(sub: u32) -> u32 {
    0b1101011 << 21 | sub
}

instructions! {
    ROR     => 0b0000000 << 21, RegSource, WCZ;
    ROL     => 0b0000001 << 21, RegSource, WCZ;
    SHR     => 0b0000010 << 21, RegSource, WCZ;
    SHL     => 0b0000011 << 21, RegSource, WCZ;
    RCR     => 0b0000100 << 21, RegSource, WCZ;
    RCL     => 0b0000101 << 21, RegSource, WCZ;
    SAR     => 0b0000110 << 21, RegSource, WCZ;
    SAL     => 0b0000111 << 21, RegSource, WCZ;

    ADD     => 0b0001000 << 21, RegSource, WCZ;
    ADDX    => 0b0001001 << 21, RegSource, WCZ;
    ADDS    => 0b0001010 << 21, RegSource, WCZ;
    ADDSX   => 0b0001011 << 21, RegSource, WCZ;
    SUB     => 0b0001100 << 21, RegSource, WCZ;
    SUBX    => 0b0001101 << 21, RegSource, WCZ;
    SUBS    => 0b0001110 << 21, RegSource, WCZ;
    SUBSX   => 0b0001111 << 21, RegSource, WCZ;

    CMP     => 0b0010000 << 21, RegSource, WCZ;
    CMPX    => 0b0010001 << 21, RegSource, WCZ;
    CMPS    => 0b0010010 << 21, RegSource, WCZ;
    CMPSX   => 0b0010011 << 21, RegSource, WCZ;
    CMPR    => 0b0010100 << 21, RegSource, WCZ;
    CMPM    => 0b0010101 << 21, RegSource, WCZ;
    SUBR    => 0b0010110 << 21, RegSource, WCZ;
    CMPSUB  => 0b0010111 << 21, RegSource, WCZ;

    FGE     => 0b0011000 << 21, RegSource, WCZ;
    FLE     => 0b0011001 << 21, RegSource, WCZ;
    FGES    => 0b0011010 << 21, RegSource, WCZ;
    FLES    => 0b0011011 << 21, RegSource, WCZ;
    SUMC    => 0b0011100 << 21, RegSource, WCZ;
    SUMNC   => 0b0011101 << 21, RegSource, WCZ;
    SUMZ    => 0b0011110 << 21, RegSource, WCZ;
    SUMNZ   => 0b0011111 << 21, RegSource, WCZ;

    BITL    => 0b0100000 << 21, RegSource, WCZ;
    BITH    => 0b0100001 << 21, RegSource, WCZ;
    BITC    => 0b0100010 << 21, RegSource, WCZ;
    BITNC   => 0b0100011 << 21, RegSource, WCZ;
    BITZ    => 0b0100100 << 21, RegSource, WCZ;
    BITNZ   => 0b0100101 << 21, RegSource, WCZ;
    BITRND  => 0b0100110 << 21, RegSource, WCZ;
    BITNOT  => 0b0100111 << 21, RegSource, WCZ;

    AND     => 0b0101000 << 21, RegSource, WCZ;
    ANDN    => 0b0101001 << 21, RegSource, WCZ;
    OR      => 0b0101010 << 21, RegSource, WCZ;
    XOR     => 0b0101011 << 21, RegSource, WCZ;
    MUXC    => 0b0101100 << 21, RegSource, WCZ;
    MUXNC   => 0b0101101 << 21, RegSource, WCZ;
    MUXZ    => 0b0101110 << 21, RegSource, WCZ;
    MUXNZ   => 0b0101111 << 21, RegSource, WCZ;

    MOV     => 0b0110000 << 21, RegSource, WCZ;
    NOT     => 0b0110001 << 21, RegOptSource, WCZ;
    ABS     => 0b0110010 << 21, RegOptSource, WCZ;
    NEG     => 0b0110011 << 21, RegOptSource, WCZ;
    NEGC    => 0b0110100 << 21, RegOptSource, WCZ;
    NEGNC   => 0b0110101 << 21, RegOptSource, WCZ;
    NEGZ    => 0b0110110 << 21, RegOptSource, WCZ;
    NEGNZ   => 0b0110111 << 21, RegOptSource, WCZ;

    INCMOD  => 0b0111000 << 21, RegSource, WCZ;
    DECMOD  => 0b0111001 << 21, RegSource, WCZ;
    ZEROX   => 0b0111010 << 21, RegSource, WCZ;
    SIGNX   => 0b0111011 << 21, RegSource, WCZ;
    ENCOD   => 0b0111100 << 21, RegOptSource, WCZ;
    ONES    => 0b0111101 << 21, RegOptSource, WCZ;
    TEST    => 0b0111110 << 21, RegOptSource, WCZ;
    TESTN   => 0b0111111 << 21, RegSource, WCZ;

    SETBYTE => 0b1000110 << 21, Field2, NONE;
    GETBYTE => 0b1000111 << 21, Field2, NONE;
    ROLBYTE => 0b1001000 << 21, Field2, NONE;
    SETWORD => 0b10010010 << 20, Field1, NONE;
    GETWORD => 0b10010011 << 20, Field1, NONE;
    ROLWORD => 0b10010100 << 20, Field1, NONE;

    SETR    => 0b100110100 << 19, RegSource, NONE;
    SETD    => 0b100110101 << 19, RegSource, NONE;
    SETS    => 0b100110110 << 19, RegSource, NONE;
    DECOD   => 0b100110111 << 19, RegOptSource, NONE;
    BMASK   => 0b100111000 << 19, RegOptSource, NONE;

    MUL     => 0b10100000 << 20, RegSource, WZ;
    MULS    => 0b10100001 << 20, RegSource, WZ;
    SCA     => 0b10100010 << 20, RegSource, WZ;
    SCAS    => 0b10100011 << 20, RegSource, WZ;

    RDLUT   => 0b1010101 << 21, RegSource, WCZ;
    RDBYTE  => 0b1010110 << 21, RegSource, WCZ;
    RDWORD  => 0b1010111 << 21, RegSource, WCZ;
    RDLONG  => 0b1011000 << 21, RegSource, WCZ;

    DJZ     => 0b101101100 << 19, RelBranch, NONE;
    DJNZ    => 0b101101101 << 19, RelBranch, NONE;
    DJF     => 0b101101110 << 19, RelBranch, NONE;
    DJNF    => 0b101101111 << 19, RelBranch, NONE;
    IJZ     => 0b101110000 << 19, RelBranch, NONE;
    IJNZ    => 0b101110001 << 19, RelBranch, NONE;
    TJZ     => 0b101110010 << 19, RelBranch, NONE;
    TJNZ    => 0b101110011 << 19, RelBranch, NONE;
    TJF     => 0b101110100 << 19, RelBranch, NONE;
    TJNF    => 0b101110101 << 19, RelBranch, NONE;
    TJS     => 0b101110110 << 19, RelBranch, NONE;
    TJNS    => 0b101110111 << 19, RelBranch, NONE;

    WRPIN   => 0b11000000 << 20, Pair, NONE;
    WXPIN   => 0b11000001 << 20, Pair, NONE;
    WYPIN   => 0b11000010 << 20, Pair, NONE;
    WRLUT   => 0b11000011 << 20, Pair, NONE;
    WRBYTE  => 0b11000100 << 20, Pair, NONE;
    WRWORD  => 0b11000101 << 20, Pair, NONE;
    WRLONG  => 0b11000110 << 20, Pair, NONE;
    RDFAST  => 0b11000111 << 20, Pair, NONE;
    WRFAST  => 0b11001000 << 20, Pair, NONE;
    FBLOCK  => 0b11001001 << 20, Pair, NONE;
    REP     => 0b11001101 << 20, Pair, NONE;
    COGINIT => 0b1100111 << 21, Pair, WC;

    QMUL    => 0b11010000 << 20, Pair, NONE;
    QDIV    => 0b11010001 << 20, Pair, NONE;
    QFRAC   => 0b11010010 << 20, Pair, NONE;
    QSQRT   => 0b11010011 << 20, Pair, NONE;
    QROTATE => 0b11010100 << 20, Pair, NONE;
    QVECTOR => 0b11010101 << 20, Pair, NONE;

    HUBSET  => d_only(0x00), Dest, NONE;
    COGID   => d_only(0x01), Dest, WC;
    COGSTOP => d_only(0x03), Dest, NONE;
    LOCKNEW => d_only(0x04), Reg, WC;
    LOCKRET => d_only(0x05), Dest, NONE;
    LOCKTRY => d_only(0x06), Dest, WC;
    LOCKREL => d_only(0x07), Dest, WC;
    QLOG    => d_only(0x0E), Dest, NONE;
    QEXP    => d_only(0x0F), Dest, NONE;
    RFBYTE  => d_only(0x10), Reg, WCZ;
    RFWORD  => d_only(0x11), Reg, WCZ;
    RFLONG  => d_only(0x12), Reg, WCZ;
    RFVAR   => d_only(0x13), Reg, WCZ;
    RFVARS  => d_only(0x14), Reg, WCZ;
    WFBYTE  => d_only(0x15), Dest, NONE;
    WFWORD  => d_only(0x16), Dest, NONE;
    WFLONG  => d_only(0x17), Dest, NONE;
    GETQX   => d_only(0x18), Reg, WCZ;
    GETQY   => d_only(0x19), Reg, WCZ;
    GETCT   => d_only(0x1A), Reg, WC;
    GETRND  => d_only(0x1B), Reg, WCZ;
    SETDACS => d_only(0x1C), Dest, NONE;
    SETXFRQ => d_only(0x1D), Dest, NONE;
    GETXACC => d_only(0x1E), Reg, NONE;
    WAITX   => d_only(0x1F), Dest, WCZ;

    RET     => d_only(0x2D) | 1 << 18, Bare, WCZ;
    RETA    => d_only(0x2E) | 1 << 18, Bare, WCZ;
    RETB    => d_only(0x2F) | 1 << 18, Bare, WCZ;

    DIRL    => d_only(0x40), Dest, WCZ;
    DIRH    => d_only(0x41), Dest, WCZ;
    DIRC    => d_only(0x42), Dest, WCZ;
    DIRNC   => d_only(0x43), Dest, WCZ;
    DIRZ    => d_only(0x44), Dest, WCZ;
    DIRNZ   => d_only(0x45), Dest, WCZ;
    DIRRND  => d_only(0x46), Dest, WCZ;
    DIRNOT  => d_only(0x47), Dest, WCZ;
    OUTL    => d_only(0x48), Dest, WCZ;
    OUTH    => d_only(0x49), Dest, WCZ;
    OUTC    => d_only(0x4A), Dest, WCZ;
    OUTNC   => d_only(0x4B), Dest, WCZ;
    OUTZ    => d_only(0x4C), Dest, WCZ;
    OUTNZ   => d_only(0x4D), Dest, WCZ;
    OUTRND  => d_only(0x4E), Dest, WCZ;
    OUTNOT  => d_only(0x4F), Dest, WCZ;
    FLTL    => d_only(0x50), Dest, WCZ;
    FLTH    => d_only(0x51), Dest, WCZ;
    FLTC    => d_only(0x52), Dest, WCZ;
    FLTNC   => d_only(0x53), Dest, WCZ;
    FLTZ    => d_only(0x54), Dest, WCZ;
    FLTNZ   => d_only(0x55), Dest, WCZ;
    FLTRND  => d_only(0x56), Dest, WCZ;
    FLTNOT  => d_only(0x57), Dest, WCZ;
    DRVL    => d_only(0x58), Dest, WCZ;
    DRVH    => d_only(0x59), Dest, WCZ;
    DRVC    => d_only(0x5A), Dest, WCZ;
    DRVNC   => d_only(0x5B), Dest, WCZ;
    DRVZ    => d_only(0x5C), Dest, WCZ;
    DRVNZ   => d_only(0x5D), Dest, WCZ;
    DRVRND  => d_only(0x5E), Dest, WCZ;
    DRVNOT  => d_only(0x5F), Dest, WCZ;

    REV     => d_only(0x69), Reg, NONE;
    RCZR    => d_only(0x6A), Reg, WCZ;
    RCZL    => d_only(0x6B), Reg, WCZ;
    WRC     => d_only(0x6C), Reg, NONE;
    WRNC    => d_only(0x6D), Reg, NONE;
    WRZ     => d_only(0x6E), Reg, NONE;
    WRNZ    => d_only(0x6F), Reg, NONE;

    JMP     => 0b1101100 << 21, Jump, WCZ, alt d_only(0x2C);
    CALL    => 0b1101101 << 21, Jump, WCZ, alt d_only(0x2D);
    CALLA   => 0b1101110 << 21, Jump, WCZ, alt d_only(0x2E);
    CALLB   => 0b1101111 << 21, Jump, WCZ, alt d_only(0x2F);
    CALLD   => 0b11100 << 23, PointerJump, NONE;
    LOC     => 0b11101 << 23, PointerJump, NONE;

    AUGS    => 0b11110 << 23, Augment, NONE;
    AUGD    => 0b11111 << 23, Augment, NONE;

    NOP     => 0, Bare, NONE;
}

impl Mnemonic {
    /// Lecturas y escrituras de hub, cuyo inmediato fuente es de 8 bits.
    pub fn is_hub_transfer(self) -> bool {
        matches!(
            self,
            Mnemonic::RDBYTE
                | Mnemonic::RDWORD
                | Mnemonic::RDLONG
                | Mnemonic::WRBYTE
                | Mnemonic::WRWORD
                | Mnemonic::WRLONG
        )
    }
}

/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Machine code and BASIC loader templates packed onto the virtual
//! cartridge. The `IX_*` offsets address the operand slots that get patched
//! with the snapshot's register values.

/// Space reserved behind the launcher code for the tail bytes displaced by
/// the in-memory decompression.
pub(super) const B_GAP: usize = 128;

/// The launcher stub, loaded to 16384. Restores the alternate register set,
/// I, R and the 128K paging port, decompresses the main block downwards in
/// memory, copies the displaced tail bytes back into place, then restores
/// the main registers, SP, interrupt mode and jumps into the snapshot.
pub(super) const LAUNCH_MDR_FULL: [u8; LAUNCH_CODE_LEN] = [
    0xf3, //             di
    0x01, 0x00, 0x00, // ld bc,AF'          F' -> 2, A' -> 3
    0xc5, //             push bc
    0xf1, //             pop af
    0x08, //             ex af,af'
    0x01, 0x00, 0x00, // ld bc,BC'          8, 9
    0x11, 0x00, 0x00, // ld de,DE'          11, 12
    0x21, 0x00, 0x00, // ld hl,HL'          14, 15
    0xd9, //             exx
    0x3e, 0x00, //       ld a,i_reg         17, 18
    0xed, 0x47, //       ld i,a
    0x3e, 0x00, //       ld a,r_reg         21, 22
    0xed, 0x4f, //       ld r,a
    0x3e, 0x00, //       ld a,page          25, 26 (last OUT to 0x7ffd)
    0x01, 0xfd, 0x7f, // ld bc,0x7ffd
    0xed, 0x79, //       out (c),a
    0x21, 0x00, 0x00, // ld hl,comp         32, 33 (compressed main start)
    0x11, 0x00, 0x61, // ld de,0x6100
    0x06, 0x00, //       ld b,delta         38, 39 (tail copy count)
    0xc5, //             push bc
    0xed, 0xb0, //       ldir
    0x01, 0x00, 0x00, // ld bc,BC           43, 44, 45
    0x11, 0x00, 0x00, // ld de,DE           47, 48
    0xdd, 0x21, 0x00, 0x00, // ld ix,IX     51, 52
    0xfd, 0x21, 0x00, 0x00, // ld iy,IY     55, 56
    0x0e, 0x00, //       ld c,F             57, 58
    0x06, 0x00, //       ld b,A             59, 60
    0xc5, //             push bc
    0xf1, //             pop af
    0x21, 0x00, 0x00, // ld hl,HL           63, 64, 65
    0x31, 0x00, 0x00, // ld sp,SP           66, 67, 68
    0xed, 0x56, //       im 1               69, 70
    0xfb, //             ei                 71
    0xc3, 0x00, 0x00, // jp PC              72, 73, 74
];

/// Length of the meaningful launcher code; the tail copy bytes get appended
/// behind this.
pub(super) const LAUNCH_CODE_LEN: usize = 75;

pub(super) const IX_F_ALT: usize = 2;
pub(super) const IX_A_ALT: usize = 3;
pub(super) const IX_BC_ALT: usize = 8;
pub(super) const IX_DE_ALT: usize = 11;
pub(super) const IX_HL_ALT: usize = 14;
pub(super) const IX_I: usize = 18;
pub(super) const IX_R: usize = 22;
pub(super) const IX_OUT: usize = 26;
pub(super) const IX_CP: usize = 33;
pub(super) const IX_LCS: usize = 39;
pub(super) const IX_BC: usize = 44;
pub(super) const IX_DE: usize = 47;
pub(super) const IX_IX: usize = 51;
pub(super) const IX_IY: usize = 55;
pub(super) const IX_F: usize = 58;
pub(super) const IX_A: usize = 60;
pub(super) const IX_HL: usize = 64;
pub(super) const IX_SP: usize = 67;
pub(super) const IX_IM: usize = 70;
pub(super) const IX_EI: usize = 71;
pub(super) const IX_JP: usize = 73;

/// The tokenized BASIC `run` program for 48K snapshots: sets border and
/// paper, loads the screen, the main block and the launcher, then jumps in.
pub(super) const MDR_BL_48K: [u8; 76] = [
    0x00, 0x0a, 0x10, 0x00, // line 10, 16 bytes
    0xfd, 0x32, 0x33, 0x39, 0x39, 0x39, 0x0e, 0x00, 0x00, 0xbf, 0x5d, 0x00,
    0x3a, 0xe7, 0x30, 0x0d, // CLEAR 23999: BORDER d
    0x00, 0x14, 0x0e, 0x00, // line 20, 14 bytes
    0xda, 0x30, 0x3a, 0xd9, 0x37, 0x3a, 0xfb, 0x3a, 0xef, 0x2a, 0x22, 0x53,
    0x22, 0x0d, //           PAPER d: INK 7: CLS: LOAD *"S"
    0x00, 0x1e, 0x10, 0x00, // line 30, 16 bytes
    0xef, 0x2a, 0x22, 0x4d, 0x22, 0xaf, 0x3a, 0xef, 0x2a, 0x22, 0x4c, 0x22,
    0xaf, 0x0d, 0x00, 0x00, // LOAD *"M" CODE: LOAD *"L" CODE
    0x00, 0x28, 0x0e, 0x00, // line 40, 14 bytes
    0xf9, 0xc0, 0x31, 0x36, 0x33, 0x38, 0x34, 0x0e, 0x00, 0x00, 0x00, 0x40,
    0x00, 0x0d, //           RANDOMIZE USR 16384
];

pub(super) const IX_48K_BORDER: usize = 18;
pub(super) const IX_48K_PAPER: usize = 25;

/// The tokenized BASIC `run` program for 128K snapshots: as the 48K one,
/// but additionally loads the five page files before the launcher.
pub(super) const MDR_BL_128K: [u8; 114] = [
    0x00, 0x0a, 0x10, 0x00, // line 10, 16 bytes
    0xfd, 0x32, 0x33, 0x39, 0x39, 0x39, 0x0e, 0x00, 0x00, 0xbf, 0x5d, 0x00,
    0x3a, 0xe7, 0x30, 0x0d, // CLEAR 23999: BORDER d
    0x00, 0x14, 0x0e, 0x00, // line 20, 14 bytes
    0xda, 0x30, 0x3a, 0xd9, 0x37, 0x3a, 0xfb, 0x3a, 0xef, 0x2a, 0x22, 0x53,
    0x22, 0x0d, //           PAPER d: INK 7: CLS: LOAD *"S"
    0x00, 0x1e, 0x18, 0x00, // line 30, 24 bytes
    0xeb, 0x6e, 0x3d, 0x31, 0x0e, 0x00, 0x00, 0x01, 0x00, 0x00, 0xcc, 0x35,
    0x0e, 0x00, 0x00, 0x05, 0x00, 0x00, 0x3a, 0xef, 0x2a, 0x6e, 0xaf, 0x0d,
    //                       FOR n=1 TO 5: LOAD *n CODE
    0x00, 0x28, 0x06, 0x00, // line 40, 6 bytes
    0xf3, 0x6e, 0x3a, 0xec, 0x31, 0x0d, // NEXT n: GO TO 1
    0x00, 0x32, 0x10, 0x00, // line 50, 16 bytes
    0xef, 0x2a, 0x22, 0x4d, 0x22, 0xaf, 0x3a, 0xef, 0x2a, 0x22, 0x4c, 0x22,
    0xaf, 0x0d, 0x00, 0x00, // LOAD *"M" CODE: LOAD *"L" CODE
    0x00, 0x3c, 0x0e, 0x00, // line 60, 14 bytes
    0xf9, 0xc0, 0x31, 0x36, 0x33, 0x38, 0x34, 0x0e, 0x00, 0x00, 0x00, 0x40,
    0x00, 0x0d, //           RANDOMIZE USR 16384
];

pub(super) const IX_128K_BORDER: usize = 18;
pub(super) const IX_128K_PAPER: usize = 25;

/// Screen decompressor prefixed to the compressed screen file: unpacks the
/// attribute-interleaved stream straight into display memory.
pub(super) const SCR_LOAD: [u8; 43] = [
    0xf3, //             di
    0x21, 0x2c, 0x62, // ld hl,unpack source (behind this stub)
    0x11, 0x00, 0x58, // ld de,0x5800
    0x7e, //             ld a,(hl)
    0xfe, 0xff, //       cp 0xff
    0x28, 0x1e, //       jr z,done
    0xfe, 0x20, //       cp 0x20
    0x38, 0x0a, //       jr c,literals
    0x47, //             ld b,a
    0xe6, 0x1f, //       and 0x1f
    0x4f, //             ld c,a
    0x23, //             inc hl
    0xed, 0xb0, //       ldir
    0x18, 0xee, //       jr loop
    0x23, //             inc hl (literals)
    0x4e, //             ld c,(hl)
    0x06, 0x00, //       ld b,0
    0x23, //             inc hl
    0xed, 0xb0, //       ldir
    0x18, 0xe5, //       jr loop
    0xc9, //             ret (done)
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Page unpacker prefixed to the compressed 128K page files. The final byte
/// is the page number operand and gets replaced per page file.
pub(super) const UNPACK: [u8; 37] = [
    0xf3, //             di
    0x01, 0xfd, 0x7f, // ld bc,0x7ffd
    0x3a, 0x23, 0x7e, // ld a,(page)
    0xed, 0x79, //       out (c),a
    0x21, 0x24, 0x7e, // ld hl,source
    0x11, 0x00, 0xc0, // ld de,0xc000
    0x7e, //             ld a,(hl)
    0xfe, 0xff, //       cp 0xff
    0xc8, //             ret z
    0x47, //             ld b,a
    0xe6, 0x1f, //       and 0x1f
    0x4f, //             ld c,a
    0x23, //             inc hl
    0xed, 0xb0, //       ldir
    0x18, 0xf2, //       jr loop
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x11, //             page number operand
];
